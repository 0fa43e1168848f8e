use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("startup gate was disposed before it was set")]
pub struct GateDisposed;

/// One-shot latch: set once from any thread, awaited by many.
#[derive(Debug, Default)]
pub struct StartupGate {
    set: AtomicBool,
    disposed: AtomicBool,
    notify: Notify,
}

impl StartupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that set the gate.
    pub fn set(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        let first = !self.set.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub async fn wait(&self) -> Result<(), GateDisposed> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flags so a concurrent `set` is not missed.
            notified.as_mut().enable();

            if self.is_set() {
                return Ok(());
            }
            if self.disposed.load(Ordering::Acquire) {
                return Err(GateDisposed);
            }
            notified.await;
        }
    }

    /// Wake every waiter; unset waiters get [`GateDisposed`]. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn set_releases_every_waiter() {
        let gate = Arc::new(StartupGate::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let g = gate.clone();
                tokio::spawn(async move { g.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(gate.set());
        assert!(!gate.set());
        for w in waiters {
            assert_eq!(w.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn wait_after_set_returns_immediately() {
        let gate = StartupGate::new();
        gate.set();
        tokio::time::timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("gate should already be open")
            .unwrap();
    }

    #[tokio::test]
    async fn dispose_wakes_pending_waiters() {
        let gate = Arc::new(StartupGate::new());
        let g = gate.clone();
        let waiter = tokio::spawn(async move { g.wait().await });
        tokio::task::yield_now().await;

        gate.dispose();
        gate.dispose();
        assert_eq!(waiter.await.unwrap(), Err(GateDisposed));
        assert!(!gate.set());
    }

    #[test]
    fn set_from_plain_thread() {
        let gate = Arc::new(StartupGate::new());
        let g = gate.clone();
        std::thread::spawn(move || g.set()).join().unwrap();
        assert!(gate.is_set());
    }
}
