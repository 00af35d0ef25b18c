use tokio::sync::watch;

/// Cooperative cancellation token shared by a turn's provider stream,
/// subprocesses, and approval callbacks.
///
/// Cloned freely; all clones observe the same cancellation. The paired
/// [`CancelHandle`] triggers it. Dropping the handle does NOT cancel;
/// a turn that outlives its caller keeps running until it finishes.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// The triggering side of a [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that can never be cancelled (for tests and one-shot helpers).
    pub fn never() -> CancelToken {
        // The sender drops immediately; the receiver keeps reporting the
        // last value (false) and `cancelled()` pends forever.
        let (_tx, rx) = watch::channel(false);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token is cancelled. If the handle was dropped
    /// without cancelling, this pends forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}
