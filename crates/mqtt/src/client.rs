//! `rumqttc` client construction from [`Config`].
//!
//! `ClientBuilder` hides the `MqttOptions`/`Transport` setup, so callers get
//! back a ready `AsyncClient` and its `EventLoop`. Nothing touches the
//! network here; the first `EventLoop::poll` opens the connection.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
};

/// Builder for an `AsyncClient`/`EventLoop` pair.
///
/// The client is cloneable and may be used from any task. The event loop must
/// be polled by exactly one task.
pub struct ClientBuilder {
    opts: MqttOptions,

    /// Capacity of the request channel. A full channel makes client calls
    /// wait until the event loop is polled again.
    cap: usize,

    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            tls_config: None,
        }
    }

    /// Creates a builder from a validated configuration.
    ///
    /// `config.client_id` must already be set; `MqttHandler::new` fills in a
    /// generated id when the configured one is empty.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ConfigError` when `config` fails validation and
    /// `TransferError::ClientSetup` for an empty client id or an incomplete
    /// TLS section.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        validator::Validate::validate(config)?;

        if config.client_id.is_empty() {
            return Err(TransferError::ClientSetup("client_id is not set".into()));
        }

        let cap = config.request_channel_capacity.unwrap_or(10) as usize;
        let mut builder = Self::new(config.client_id.clone(), config.host.clone(), config.port, cap)
            .keep_alive(config.keep_alive)
            .clean_session(config.clean_session)
            .max_inflight(config.max_inflight);

        if let Some(max) = config.max_packet_size {
            builder = builder.max_packet_size(max as usize, max as usize);
        }
        if let Some((user, pass)) = config.credentials() {
            builder = builder.credentials(user, pass);
        }

        if let Some(tls) = config.tls.as_ref().filter(|tls| tls.is_enabled()) {
            tls.validate_config().map_err(|e| {
                TransferError::ClientSetup(format!("Invalid TLS configuration: {e}"))
            })?;
            builder = match (
                tls.ca_cert_path.as_deref(),
                tls.client_cert_path.as_deref(),
                tls.client_key_path.as_deref(),
            ) {
                (Some(ca), Some(cert), Some(key)) => builder.with_tls(ca, cert, key),
                (Some(ca), _, _) => builder.with_tls_ca_only(ca),
                (None, _, _) => builder,
            };
        }

        Ok(builder)
    }

    pub fn with_tls(
        mut self,
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.tls_config = Some(TlsConfig::new(
            ca_cert_path,
            client_cert_path,
            client_key_path,
        ));
        self
    }

    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<String>) -> Self {
        self.tls_config = Some(TlsConfig::with_ca_only(ca_cert_path));
        self
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn max_packet_size(mut self, incoming: usize, outgoing: usize) -> Self {
        self.opts.set_max_packet_size(incoming, outgoing);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    /// Sets broker credentials. They travel in clear text without TLS.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Loads the certificate files and builds the TLS transport.
    fn build_tls_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls_config
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("TLS configuration is not set".into()))?;
        let ca = fs::read(ca_path)?;

        let client_auth = match (&tls_config.client_cert_path, &tls_config.client_key_path) {
            (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Consumes the builder and returns the client with its event loop.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(tls_config) = &self.tls_config {
            opts.set_transport(Self::build_tls_transport(tls_config)?);
        }

        Ok(AsyncClient::new(opts, self.cap))
    }
}
