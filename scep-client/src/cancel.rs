//! Cancellation for the pending-retry wait.

use tokio::sync::watch;

/// Cancellation signal that can be cloned and awaited.
///
/// Unlike a broadcast, a signal obtained after `cancel` still observes it.
#[derive(Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone without cancelling.
            std::future::pending::<()>().await;
        }
    }
}

/// Owner side of a [`CancelSignal`].
pub struct Canceller {
    sender: watch::Sender<bool>,
}

impl Canceller {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let canceller = Canceller::new();
        let signal = canceller.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_signal_sees_cancel() {
        let canceller = Canceller::new();
        canceller.cancel();
        let signal = canceller.signal();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_stays_pending() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let result = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
