//! Abort signal shared between the orchestrator and a running transfer.
//!
//! The orchestrator keeps one token per active task and hands a clone to the
//! transport. Transports either poll [`CancellationToken::is_cancelled`]
//! between chunks or race their I/O against [`CancellationToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable, one-shot abort signal.
///
/// Cancelling any clone cancels all of them. A token cannot be reset: a
/// restarted transfer gets a fresh token.
///
/// # Example
///
/// ```
/// use stowage_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let for_transport = token.clone();
///
/// token.cancel();
/// assert!(for_transport.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in [`Self::cancelled`].
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Return `Err(DownloadCancelled)` if cancellation was requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::StowageError::DownloadCancelled)
        } else {
            Ok(())
        }
    }
}
