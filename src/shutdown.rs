//! Process exit signal.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot "the app must exit" signal.
///
/// Fired by the consent gate when the user declines the terms; the binary
/// waits on it to stop serving and return from `main`.
#[derive(Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}
