use std::{process, sync::Arc};

use mqtt_logger::{
    config::Config,
    core::{signals, LogHandler, Subscriber},
    logger::LoggerManager,
    print_error,
};
use mqtt_logger_mqtt::MqttHandler;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("starting MQTT-Logger v{}.", env!("CARGO_PKG_VERSION"));
    let client = MqttHandler::new(cfg.mqtt.clone(), Arc::new(LogHandler)).unwrap_or_else(|e| {
        error!("Failed to create MQTT client: {}", e);
        process::exit(1);
    });
    info!(
        "Broker {}:{}, topics: {}",
        cfg.mqtt.host,
        cfg.mqtt.port,
        client.topics().join(", ")
    );
    debug!("MQTT client id: {}", client.client_id());

    let shutdown = CancellationToken::new();
    let listener = signals::install(shutdown.clone());

    let mut subscriber = Subscriber::new(client);
    subscriber.run(shutdown.clone()).await;

    if let Some(listener) = listener {
        shutdown.cancel();
        signals::join(listener).await;
    }
}
