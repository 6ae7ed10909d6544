use std::sync::Arc;
use tokio::sync::watch;

/// Stop signal for a pipeline task and whoever waits on it. Once triggered
/// it stays triggered.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Shutdown { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the shutdown signal has been triggered.
pub async fn triggered(rx: &mut watch::Receiver<bool>) {
    // An error means every sender is gone, which only happens on teardown.
    let _ = rx.wait_for(|stopped| *stopped).await;
}
