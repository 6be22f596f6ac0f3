//! Error type for the MQTT subscriber client.
//!
//! `TransferError` aggregates configuration, client setup and network
//! failures into one enum. The lifecycle controller only cares whether a
//! connect attempt failed, but the variants keep enough context for the
//! warning it logs before retrying.

use thiserror::Error;

/// The unified error type for MQTT client operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// MQTT client initialization failed.
    ///
    /// Typically unreadable TLS material or an incomplete TLS section.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The local client could not queue a request for the event loop.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Connection to the broker failed or was lost.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// The broker answered CONNECT with something other than success.
    #[error("Connection refused by broker: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),

    /// No CONNACK arrived within the configured connection timeout.
    #[error("Timed out after {0} seconds waiting for CONNACK")]
    ConnectTimeout(u64),

    /// File I/O failed, usually while loading certificates.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
