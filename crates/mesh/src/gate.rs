//! One-shot readiness gates.

use tokio::sync::watch;

/// Single-producer latch: opened at most once, observed by any number of
/// waiters. Never re-signaled.
pub(crate) struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Open the gate. Subsequent calls are no-ops.
    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate opens.
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn starts_closed_and_opens_once() {
        let gate = Gate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        gate.open();
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn wakes_pending_waiters() {
        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_open() {
        let gate = Gate::new();
        gate.open();
        tokio::time::timeout(Duration::from_millis(100), gate.wait())
            .await
            .expect("open gate should not block");
    }
}
