//! Cooperative cancellation, checked between listing pages and before each
//! deletion starts.

use tokio::sync::watch;

/// Create a linked trigger/cancellation pair.
pub fn cancellation() -> (CancelTrigger, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger(tx), Cancellation(Some(rx)))
}

#[derive(Debug)]
pub struct CancelTrigger(watch::Sender<bool>);

impl CancelTrigger {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cancellation(Option<watch::Receiver<bool>>);

impl Cancellation {
    /// A cancellation that never fires.
    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
