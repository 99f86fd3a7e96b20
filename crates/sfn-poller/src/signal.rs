//! Single-fire notification used for task "started" and "done" barriers

use std::sync::Arc;

use tokio::sync::watch;

/// A latch that fires at most once and stays fired
///
/// Any number of clones may [`wait`](Signal::wait); waiters that arrive after
/// the signal fired return immediately.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create an unfired signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Check whether the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let signal = Signal::new();
        signal.fire();

        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("fired signal should not block");
    }

    #[tokio::test]
    async fn test_wakes_all_waiters() {
        let signal = Signal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        signal.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_unfired_signal_blocks() {
        let signal = Signal::new();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(result.is_err());
    }
}
