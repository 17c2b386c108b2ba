//! Cancellation plumbing shared by every long wait in the system.
//!
//! A shutdown signal is a `watch` channel of `bool`: `false` while the owner
//! is live, flipped to `true` exactly once to cancel. Long-running waits
//! `select!` on [`cancelled`] and return
//! [`Cancelled`](firelynx_types::error::TransactionError::Cancelled) verbatim.

use tokio::sync::watch;

/// The receiving half of a shutdown signal, cloned into every task and hook
/// that must honor cancellation.
pub type Shutdown = watch::Receiver<bool>;

/// Creates a shutdown signal pair. Dropping the sender counts as cancellation.
pub fn shutdown_channel() -> (watch::Sender<bool>, Shutdown) {
    watch::channel(false)
}

/// A shutdown receiver that never fires, for callers without a cancellation
/// scope (tests, fire-and-forget tooling). The paired sender lives in a
/// static so the channel stays open for the life of the process.
pub fn never() -> Shutdown {
    static CHANNEL: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
    CHANNEL.get_or_init(|| watch::channel(false).0).subscribe()
}

/// Completes when the signal fires or its sender is dropped.
pub async fn cancelled(shutdown: &mut Shutdown) {
    if *shutdown.borrow() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
    // Sender dropped: the owning scope is gone, treat as cancelled.
}
