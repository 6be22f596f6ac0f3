//! mqtt-logger: subscribes to MQTT topics and logs every received message
//!
//! The process is a long-running subscriber. It connects to the configured
//! broker (retrying every second until the broker answers), subscribes to
//! the configured topic filters, writes one `topic > payload` record per
//! message and disconnects cleanly on SIGINT or SIGTERM.
//!
//! ## Modules
//!
//! * `config` — TOML configuration loading and validation via `validator`.
//!
//! * `core` — Runtime components:
//!   - subscriber lifecycle controller and its session state
//!   - the logging message handler
//!   - signal-to-cancellation bridge
//!
//! * `logger` — Centralized logging initialization using `tracing`.
//!   Console output in compact, pretty or JSON format, with optional
//!   systemd journald integration.
//!
//! The MQTT side lives in the `mqtt-logger-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;
