//! # Shutdown Coordinator
//!
//! One cooperative stop signal for the whole process, built on
//! `tokio_util::sync::CancellationToken`. Cloning the coordinator clones the handle,
//! not the signal: every clone observes the same state.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared stop signal observed by the ingestion loop and the push server.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal. Calling it again is a no-op.
    pub fn signal(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown signaled");
        }
        self.token.cancel();
    }

    /// Whether the signal has been set.
    pub fn is_signaled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is set (immediately if it already is).
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token, for APIs that want one directly.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawns a task that sets the signal on Ctrl-C or, on unix, SIGTERM.
    ///
    /// The task ends on its own if the signal is set by other means first.
    pub fn listen_for_interrupt(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.cancelled() => return,
                res = signal::ctrl_c() => {
                    match res {
                        Ok(()) => tracing::info!("Ctrl-C received, initiating shutdown."),
                        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
                    }
                }
                _ = terminate() => {
                    tracing::info!("SIGTERM received, initiating shutdown.");
                }
            }
            this.signal();
        })
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn signal_is_idempotent_and_shared() {
        let coordinator = ShutdownCoordinator::new();
        let observer = coordinator.clone();
        assert!(!observer.is_signaled());

        coordinator.signal();
        coordinator.signal();
        assert!(observer.is_signaled());
        assert!(observer.token().is_cancelled());
    }

    #[tokio::test]
    async fn waiters_wake_up_on_signal() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.cancelled().await })
        };

        coordinator.signal();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake")
            .unwrap();
    }

    #[tokio::test]
    async fn interrupt_listener_exits_when_signaled_elsewhere() {
        let coordinator = ShutdownCoordinator::new();
        let listener = coordinator.listen_for_interrupt();
        coordinator.signal();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not exit")
            .unwrap();
    }
}
