//! Cooperative cancellation
//!
//! A clone-able token that in-flight calls and handlers poll or await.
//! Clones share one state; `cancel()` is idempotent and fires every waiter.
//! Built on `tokio::sync::watch` so waiting costs nothing until the signal
//! flips.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cancellation token shared between a caller and the work it started
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a token that never fires until `cancel()` is called
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Create a token that fires on its own after `timeout`
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let token = Self::new();
        let sender = token.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = sender.send(true);
        });
        token
    }

    /// Create a token linked to this one: cancelling the parent cancels the
    /// child, cancelling the child leaves the parent untouched
    ///
    /// Must be called from within a tokio runtime.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut parent_rx = self.receiver.clone();
        let child_sender = child.sender.clone();
        tokio::spawn(async move {
            loop {
                if *parent_rx.borrow() {
                    let _ = child_sender.send(true);
                    return;
                }
                if parent_rx.changed().await.is_err() {
                    return;
                }
            }
        });
        child
    }

    /// Fire the token; all clones observe the signal
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Check the signal without waiting
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until the token fires
    pub async fn cancelled(&self) {
        let mut rx = self.receiver.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // every sender is gone, the signal can never fire
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
