//! Bridges process termination signals to the shutdown token.
//!
//! SIGINT and SIGTERM on Unix, Ctrl+C elsewhere. When the platform refuses
//! signal registration the listener is skipped and the process stays
//! stoppable by other means (cancelling the token, or a forced kill).

use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Completes when either signal arrives.
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT"),
            _ = self.terminate.recv() => info!("Received SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                debug!("Ctrl+C handling unavailable: {}", e);
                std::future::pending::<()>().await
            }
        }
    }
}

/// Registers the signal handlers and spawns a task that cancels `shutdown`
/// on the first signal.
pub fn install(shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    spawn_listener(Signals::register(), shutdown)
}

/// Spawns the listener for an already attempted registration.
///
/// A failed registration is skipped silently: nothing is spawned and the
/// token is left untouched.
pub fn spawn_listener(
    registration: io::Result<Signals>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let mut signals = match registration {
        Ok(signals) => signals,
        Err(e) => {
            debug!("Signal handling unavailable, skipping handler registration: {}", e);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        tokio::select! {
            _ = signals.recv() => {
                if !shutdown.is_cancelled() {
                    shutdown.cancel();
                }
            }
            _ = shutdown.cancelled() => {}
        }
    }))
}

/// Waits for the listener task to finish. A panicked or aborted listener is
/// only logged.
pub async fn join(listener: JoinHandle<()>) {
    if let Err(e) = listener.await {
        debug!("Signal listener ended abnormally: {}", e);
    }
}
