//! Capabilities the lifecycle controller depends on.
//!
//! Keeping these as traits lets the controller run against a fake client in
//! tests, with messages delivered synchronously and no broker involved.

use async_trait::async_trait;

use crate::Result;

/// Receives every message delivered on a subscribed topic.
///
/// Called from the client's event task, one message at a time.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, topic: &str, payload: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn handle(&self, topic: &str, payload: &str) {
        self(topic, payload)
    }
}

/// A broker connection that can be opened and closed.
#[async_trait]
pub trait MqttClient: Send {
    /// Makes one connection attempt and subscribes to the configured topics.
    ///
    /// An `Err` means the attempt failed and left nothing running; the caller
    /// decides whether to retry.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the session opened by the last successful `connect`.
    ///
    /// Does nothing when no session is open.
    async fn disconnect(&mut self);

    /// Completes when the open session ends without `disconnect` being called,
    /// for instance after a fatal connection error. The session is released
    /// by then, so a new `connect` may follow.
    ///
    /// Returns immediately when no session is open. Clients whose sessions
    /// never end on their own keep the default, which never completes.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }
}
