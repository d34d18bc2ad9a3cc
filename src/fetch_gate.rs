//! Single-flight guard for holder fetches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

/// Lets one fetch per holder reach the backend at a time.
///
/// Callers that queued behind a fetch which then succeeded are told to
/// read the cache instead of issuing their own call.
#[derive(Default)]
pub struct FetchGate {
    lock: Mutex<()>,
    completed: AtomicU64,
    loading: AtomicBool,
}

pub enum Flight<'a> {
    /// Another caller's fetch finished while this one waited.
    Joined,
    /// This caller performs the fetch.
    Leader(FlightGuard<'a>),
}

/// Held for the duration of a remote fetch. Dropping it, including on
/// cancellation, clears the loading flag and admits the next caller.
pub struct FlightGuard<'a> {
    gate: &'a FetchGate,
    _permit: MutexGuard<'a, ()>,
}

impl FetchGate {
    pub async fn enter(&self) -> Flight<'_> {
        let seen = self.completed.load(Ordering::Acquire);
        let permit = self.lock.lock().await;
        if self.completed.load(Ordering::Acquire) != seen {
            return Flight::Joined;
        }
        self.loading.store(true, Ordering::Release);
        Flight::Leader(FlightGuard {
            gate: self,
            _permit: permit,
        })
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }
}

impl FlightGuard<'_> {
    /// Marks the fetch as having refreshed the cache; waiters will join it.
    pub fn complete(self) {
        self.gate.completed.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.loading.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn waiter_joins_a_completed_fetch() {
        let gate = Arc::new(FetchGate::default());
        let Flight::Leader(guard) = gate.enter().await else {
            panic!("first caller leads");
        };
        assert!(gate.is_loading());

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { matches!(gate.enter().await, Flight::Joined) }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.complete();

        assert!(waiter.await.unwrap());
        assert!(!gate.is_loading());
    }

    #[tokio::test]
    async fn failed_or_dropped_fetch_lets_the_next_caller_lead() {
        let gate = FetchGate::default();
        if let Flight::Leader(guard) = gate.enter().await {
            drop(guard);
        }
        assert!(!gate.is_loading());
        assert!(matches!(gate.enter().await, Flight::Leader(_)));
    }

    #[tokio::test]
    async fn cancelled_leader_clears_loading() {
        let gate = FetchGate::default();
        let stalled = tokio::time::timeout(Duration::from_millis(5), async {
            let _flight = gate.enter().await;
            std::future::pending::<()>().await;
        })
        .await;
        assert!(stalled.is_err());
        assert!(!gate.is_loading());
        assert!(matches!(gate.enter().await, Flight::Leader(_)));
    }
}
