use lib_telemetry::ShutdownCoordinator;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

/// Spawns a long-running worker. However it ends, returning or panicking, the
/// shutdown signal is set so the other worker does not outlive it.
pub fn spawn_supervised<F>(
    name: &'static str,
    shutdown: ShutdownCoordinator,
    worker: F,
) -> JoinHandle<Result<F::Output, JoinError>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let inner = tokio::spawn(worker);
    tokio::spawn(async move {
        let result = inner.await;
        match &result {
            Ok(_) => tracing::info!("{} worker finished", name),
            Err(e) => tracing::error!("{} worker failed: {}", name, e),
        }
        shutdown.signal();
        result
    })
}
