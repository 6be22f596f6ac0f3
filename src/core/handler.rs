//! The message callback: one info record per received message.

use mqtt_logger_mqtt::MessageHandler;
use tracing::info;

/// Logs every delivered message as `topic > payload`, verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn handle(&self, topic: &str, payload: &str) {
        info!("{} > {}", topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    #[traced_test]
    fn test_logs_topic_and_payload_verbatim() {
        LogHandler.handle("sensors/living_room/temp", "{\"value\": 21.5}");
        assert!(logs_contain("sensors/living_room/temp > {\"value\": 21.5}"));
    }

    #[test]
    #[traced_test]
    fn test_one_record_per_message() {
        LogHandler.handle("a/b", "first");
        LogHandler.handle("a/b", "second");

        logs_assert(|lines: &[&str]| {
            let records = lines.iter().filter(|line| line.contains("a/b > ")).count();
            if records == 2 {
                Ok(())
            } else {
                Err(format!("expected 2 message records, got {records}"))
            }
        });
    }

    #[test]
    #[traced_test]
    fn test_empty_payload() {
        LogHandler.handle("status/empty", "");
        assert!(logs_contain("status/empty > "));
    }
}
