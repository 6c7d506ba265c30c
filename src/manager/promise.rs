use super::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// A single-resolution outcome which any number of tasks may await.
///
/// Only the first `try_*` call settles the promise; later calls are no-ops,
/// so racing failure and cancellation signals never conflict.
#[derive(Clone, Debug)]
pub(crate) struct Promise {
    tx: Arc<watch::Sender<Option<Result<()>>>>,
}

impl Promise {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);

        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn try_resolve(&self) -> bool {
        self.try_settle(Ok(()))
    }

    pub(crate) fn try_reject(&self, e: Error) -> bool {
        self.try_settle(Err(e))
    }

    pub(crate) fn try_cancel(&self) -> bool {
        self.try_settle(Err(Error::Cancelled))
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    pub(crate) async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();

        // The sender outlives this call, as `self` holds it.
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or(Err(Error::Cancelled))
    }

    fn try_settle(&self, outcome: Result<()>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn first_settlement_wins() {
        let promise = Promise::new();

        assert!(promise.try_reject(Error::TimedOut));
        assert!(!promise.try_resolve());
        assert!(!promise.try_cancel());

        assert!(matches!(promise.wait().await, Err(Error::TimedOut)));
    }

    #[tokio::test]
    async fn waiters_are_woken_by_settlement() {
        let promise = Promise::new();
        let waiter = {
            let promise = promise.clone();
            tokio::spawn(async move { promise.wait().await })
        };

        tokio::task::yield_now().await;
        assert!(!promise.is_settled());
        promise.try_resolve();

        assert!(waiter.await.unwrap().is_ok());
        assert!(promise.is_settled());
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_failure() {
        let promise = Promise::new();
        promise.try_cancel();

        assert!(promise.wait().await.unwrap_err().is_cancelled());
    }
}
