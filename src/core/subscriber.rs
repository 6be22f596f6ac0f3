//! Subscriber lifecycle: connect with retry, wait for shutdown, disconnect.
//!
//! The controller owns its client exclusively and drives it from a single
//! task. Shutdown is requested through a [`CancellationToken`]: cancelling it
//! unblocks whichever phase is running (an attempt, the backoff, or the idle
//! wait) and `run` then performs the disconnect before returning. A session
//! that the client reports as ended sends the controller back to
//! connect-with-retry.

use std::time::Duration;

use mqtt_logger_mqtt::MqttClient;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::SessionState;

/// Fixed pause between failed connection attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct Subscriber<C> {
    client: C,
    state: watch::Sender<SessionState>,
}

impl<C: MqttClient> Subscriber<C> {
    pub fn new(client: C) -> Self {
        let (state, _) = watch::channel(SessionState::Initialized);
        Self { client, state }
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        debug!("Session state: {} -> {}", prev, next);
    }

    /// Runs the whole session and returns once it is disconnected.
    ///
    /// Blocks until `shutdown` is cancelled. The disconnect step runs on every
    /// path out of the wait, including a cancellation that arrives while the
    /// broker is still unreachable.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        while self.connect_with_retry(&shutdown).await {
            info!("Waiting for messages");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.client.closed() => {
                    warn!("Session lost, reconnecting");
                }
            }
        }
        self.shutdown().await;
    }

    /// Attempts to connect until one attempt succeeds, pausing
    /// [`RETRY_INTERVAL`] after each failure.
    ///
    /// There is no attempt limit. Returns `false` if `shutdown` was cancelled
    /// first, leaving the state at `Connecting`.
    pub async fn connect_with_retry(&mut self, shutdown: &CancellationToken) -> bool {
        self.set_state(SessionState::Connecting);

        let mut attempt: u64 = 0;
        loop {
            if shutdown.is_cancelled() {
                return false;
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                result = self.client.connect() => result,
            };

            match result {
                Ok(()) => {
                    self.set_state(SessionState::Connected);
                    info!("Connected on attempt {}", attempt);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {} failed: {}. Retrying in {}s",
                        attempt,
                        e,
                        RETRY_INTERVAL.as_secs()
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }

    /// Disconnects the client exactly once.
    ///
    /// Later calls return without touching the client.
    pub async fn shutdown(&mut self) {
        if self.state().is_shutting_down() {
            debug!("Shutdown already performed");
            return;
        }

        info!("exiting.");
        self.set_state(SessionState::ShuttingDown);
        self.client.disconnect().await;
        self.set_state(SessionState::Disconnected);
        info!("exited.");
    }
}
