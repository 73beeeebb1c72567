//! Process-wide shutdown signal
//!
//! A `watch::channel(false)` is created in `main`; every long-running task holds a
//! receiver and exits once the value flips to `true`.

use tokio::sync::watch;

/// Create the shutdown signal pair
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested
///
/// If the sender is dropped without ever signalling, this never resolves, so it is
/// safe to use as a `select!` branch next to a timer.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
