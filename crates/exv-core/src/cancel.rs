//! Cancellation signal threaded through every blocking wait.
//!
//! A `watch` channel carrying `true` once an abort has been requested.
//! The flag never goes back to `false`.

use tokio::sync::watch;

pub type CancelSender = watch::Sender<bool>;
pub type CancelReceiver = watch::Receiver<bool>;

/// Create a fresh, un-cancelled signal.
pub fn channel() -> (CancelSender, CancelReceiver) {
    watch::channel(false)
}

/// A receiver that can never be cancelled.
pub fn never() -> CancelReceiver {
    let (tx, rx) = channel();
    // Dropping the sender freezes the value at `false`.
    drop(tx);
    rx
}

pub fn is_cancelled(rx: &CancelReceiver) -> bool {
    *rx.borrow()
}

/// Resolve once cancellation has been requested. Pends forever if the
/// sender is dropped without cancelling.
pub async fn cancelled(rx: &mut CancelReceiver) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
