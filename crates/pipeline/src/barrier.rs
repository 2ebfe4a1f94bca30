//! Completion barrier joining independently paced pipes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Counts pipes that have entered but not yet completed.
///
/// Entering hands out a [`BarrierLease`]; dropping the lease is the only
/// way to leave, so each entry is left exactly once and the count can
/// never go below zero.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    pending: AtomicUsize,
    entered: AtomicUsize,
    drained: Notify,
}

impl CompletionBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one more participant.
    pub fn enter(self: &Arc<Self>) -> BarrierLease {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.entered.fetch_add(1, Ordering::Relaxed);
        BarrierLease {
            barrier: self.clone(),
        }
    }

    /// Participants still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Participants that ever entered.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::Relaxed)
    }

    fn leave(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.drained.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::error!("Completion barrier left more often than entered"),
        }
    }

    /// Wait until every participant has left.
    pub async fn wait(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait with an optional upper bound. Returns `false` on timeout.
    pub async fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait()).await.is_ok(),
            None => {
                self.wait().await;
                true
            }
        }
    }
}

/// Proof of participation in a [`CompletionBarrier`]; leaves on drop.
#[derive(Debug)]
pub struct BarrierLease {
    barrier: Arc<CompletionBarrier>,
}

impl BarrierLease {
    /// Leave the barrier now.
    pub fn release(self) {}
}

impl Drop for BarrierLease {
    fn drop(&mut self) {
        self.barrier.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_empty_barrier_is_drained() {
        let barrier = CompletionBarrier::new();
        assert!(barrier.wait_timeout(Some(Duration::from_millis(10))).await);
    }

    #[tokio::test]
    async fn test_wait_returns_after_last_release() {
        let barrier = CompletionBarrier::new();
        let first = barrier.enter();
        let second = barrier.enter();

        first.release();
        assert_eq!(barrier.pending(), 1);
        assert!(!barrier.wait_timeout(Some(Duration::from_millis(20))).await);

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        tokio::task::yield_now().await;
        drop(second);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(barrier.pending(), 0);
        assert_eq!(barrier.entered(), 2);
    }

    #[tokio::test]
    async fn test_lease_released_by_panicking_task() {
        let barrier = CompletionBarrier::new();
        let lease = barrier.enter();
        let handle = tokio::spawn(async move {
            let _lease = lease;
            panic!("pipe blew up");
        });
        assert!(handle.await.is_err());
        assert!(barrier.wait_timeout(Some(Duration::from_secs(1))).await);
    }

    proptest! {
        #[test]
        fn drains_only_after_every_lease(n in 1usize..48, order in proptest::collection::vec(any::<u16>(), 48)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let barrier = CompletionBarrier::new();
                let mut leases: Vec<_> = (0..n).map(|_| barrier.enter()).collect();
                let mut released = 0;
                while !leases.is_empty() {
                    prop_assert!(!barrier.wait_timeout(Some(Duration::ZERO)).await);
                    let idx = order[released % order.len()] as usize % leases.len();
                    leases.swap_remove(idx).release();
                    released += 1;
                    prop_assert_eq!(barrier.pending(), n - released);
                }
                prop_assert_eq!(released, n);
                prop_assert!(barrier.wait_timeout(Some(Duration::ZERO)).await);
                Ok(())
            })?;
        }
    }
}
