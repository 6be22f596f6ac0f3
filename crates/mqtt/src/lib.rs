//! # mqtt-logger-mqtt: subscriber side of an MQTT connection
//!
//! A thin layer over `rumqttc` that gives the lifecycle controller exactly
//! what it needs:
//!
//! - [`MqttClient`]: one connect attempt, one disconnect, session-end notice
//! - [`MessageHandler`]: push delivery of `(topic, payload)` pairs
//! - [`MqttHandler`]: the real implementation, bound to a [`Config`]
//!
//! ```ignore
//! use std::sync::Arc;
//! use mqtt_logger_mqtt::{Config, MqttClient, MqttHandler};
//!
//! let handler = Arc::new(|topic: &str, payload: &str| println!("{topic} > {payload}"));
//! let mut client = MqttHandler::new(config, handler)?;
//! while client.connect().await.is_err() {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! }
//! // ... messages flow to the handler ...
//! client.disconnect().await;
//! ```
//!
//! Protocol work (framing, QoS flows, keep-alive, reconnect on the wire) is
//! left to `rumqttc`. Payloads are decoded as UTF-8 before delivery, with
//! invalid sequences replaced by U+FFFD.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use client::ClientBuilder;
pub use config::{Config, TlsConfig};
pub use connection::MqttHandler;
pub use error::TransferError;
pub use traits::{MessageHandler, MqttClient};

/// Result type for MQTT client operations.
pub type Result<T> = std::result::Result<T, TransferError>;
