//! Configuration for the broker connection and the subscription set.
//!
//! All fields deserialize with serde defaults and carry `validator`
//! constraints, so a bad file fails at load time rather than at connect time.
//!
//! ```toml
//! [mqtt]
//! host = "mqtt.home.local"
//! port = 1883
//! username = "logger"
//! password = "secret"
//! topics = ["sensors/#", "$SYS/broker/uptime"]
//! qos = 1
//! ```

use std::path::Path;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Broker connection and subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port, typically 1883 (plain) or 8883 (TLS).
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier. Generated from a UUID when left empty.
    #[validate(length(max = 36, message = "Client ID must not exceed 36 characters"))]
    pub client_id: String,

    /// Optional broker username. Sent only together with `password`.
    pub username: Option<String>,

    /// Optional broker password.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Topic filters to subscribe to. Wildcards `+` and `#` are allowed.
    #[validate(
        length(min = 1, message = "At least one topic filter must be configured"),
        custom(function = "validate_topic_filters")
    )]
    pub topics: Vec<String>,

    /// Requested subscription QoS (0, 1 or 2).
    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Whether the broker should discard session state on connect.
    pub clean_session: bool,

    /// Maximum number of unacknowledged QoS 1/2 messages.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// Maximum MQTT packet size in bytes, applied in both directions.
    #[validate(range(
        min = 64,
        max = 268435455,
        message = "Max packet size must be between 64 bytes and 256 MB"
    ))]
    pub max_packet_size: Option<u32>,

    /// Capacity of the request channel between client and event loop.
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: Option<u8>,

    /// Seconds to wait for CONNACK before an attempt counts as failed.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Seconds between reconnect polls after an established session drops.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Seconds to wait for DISCONNECT to be flushed on shutdown.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Disconnect timeout must be between 1 and 60 seconds"
    ))]
    pub disconnect_timeout: u64,

    /// Optional TLS settings. TLS is used when a CA certificate is set.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            topics: Vec::new(),
            qos: 0,
            keep_alive: 60,
            clean_session: true,
            max_inflight: 10,
            max_packet_size: None,
            request_channel_capacity: Some(10),
            connection_timeout: 30,
            reconnect_delay: 1,
            disconnect_timeout: 5,
            tls: None,
        }
    }
}

impl Config {
    /// Subscription QoS as the client library type.
    ///
    /// Values above 2 are rejected by validation; they map to `ExactlyOnce`.
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Returns the credential pair when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Checks every configured filter against MQTT filter syntax.
fn validate_topic_filters(topics: &[String]) -> Result<(), ValidationError> {
    for topic in topics {
        if !rumqttc::mqttbytes::valid_filter(topic) {
            return Err(ValidationError::new("invalid_topic_filter")
                .with_message(format!("Invalid topic filter: '{topic}'").into()));
        }
    }
    Ok(())
}

/// TLS certificate paths for secure broker connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate (PEM) used to verify the broker.
    #[validate(custom(
        function = "validate_file_path",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate (PEM) for mutual TLS.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Unencrypted client private key (PEM) for mutual TLS.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Mutual TLS with CA, client certificate and key.
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    /// Server verification only.
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: None,
            client_key_path: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    /// Checks that the configured files exist and that client auth is
    /// either fully configured or absent.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let ca = self.ca_cert_path.as_deref().ok_or_else(|| {
            ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into())
        })?;
        validate_file_path(ca)?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new("incomplete_client_auth").with_message(
                    "Both client certificate and key must be provided or neither".into(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}
