//! Engine-wide cancellation signal.
//!
//! A single controller trips the signal once; every task holding a
//! [`Shutdown`] observes it at its next suspension point.

use tokio::sync::watch;

/// Owning side of the shutdown signal.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// Cloneable observer side handed to scheduled ticks, checkers, the alert
/// processor, and the broadcast hub.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownController {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    /// Trip the signal. Idempotent.
    pub fn trip(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the signal trips (immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The controller is kept alive by the engine for the process
        // lifetime; a closed channel means shutdown as well.
        let _ = rx.changed().await;
    }
}
