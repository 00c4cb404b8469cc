//! Externally supplied abort signals for in-flight executions.
//!
//! A signal tripped before the first collaborator call must result in zero
//! collaborator calls; a trip mid-call takes effect at the next suspension
//! point. Executors translate a tripped signal into `status = "cancelled"`.

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use tokio::sync::Notify;

#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Idempotent; wakes every task parked in
    /// [`AbortSignal::aborted`].
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once the signal trips. Resolves immediately if it already
    /// has.
    pub async fn aborted(&self) {
        // Register interest before the flag check so an abort() between the
        // check and the await cannot be missed.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AbortSignal;

    #[tokio::test]
    async fn test_abort_wakes_waiter() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.aborted().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_aborted_resolves_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        assert!(signal.is_aborted());
        tokio::time::timeout(Duration::from_millis(50), signal.aborted())
            .await
            .expect("should not block");
    }
}
