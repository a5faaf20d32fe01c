//! Process-wide shutdown flag

use std::sync::Arc;

use tokio::sync::watch;

/// Set once on shutdown, observed by the ingress listener and the worker
///
/// Clones share one flag. Once set it never clears.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag; returns `true` only for the call that actually set it
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}
