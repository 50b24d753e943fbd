//! Single-flight load coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;
type Registry<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

/// Deduplicates concurrent loads of the same key.
///
/// The first caller for a key starts the load; every caller that arrives
/// while it is in flight waits on the same shared result, so at most one
/// load per key runs at any instant. The load itself is spawned onto the
/// runtime: a caller that gives up does not abort it, and later callers in
/// the same window still observe its outcome. An absent result (`None`)
/// reaches every waiter identically and is not remembered; the next call
/// after the flight has finished starts a fresh load.
pub struct SingleFlight<V> {
    inflight: Registry<V>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        SingleFlight {
            inflight: Arc::default(),
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `load` for `key`, or joins the in-flight load already running
    /// for it.
    pub async fn run<F>(&self, key: &str, load: F) -> Option<V>
    where
        F: Future<Output = Option<V>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(flight) => flight.clone(),
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let key = key.to_owned();
                    let registry_key = key.clone();
                    // The entry is removed by the loader task itself, right
                    // when the result is published: waiters that already
                    // hold the flight still resolve, while the next caller
                    // starts over.
                    let task = tokio::spawn(async move {
                        let result = load.await;
                        registry.lock().remove(&registry_key);
                        result
                    });
                    let flight: Flight<V> = async move { task.await.ok().flatten() }
                        .boxed()
                        .shared();
                    inflight.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// The number of loads currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Returns whether no load is in flight.
    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_callers_share_one_load() {
        let flights: Arc<SingleFlight<String>> = Arc::new(SingleFlight::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let invocations = Arc::clone(&invocations);
                tokio::spawn(async move {
                    flights
                        .run("alpha", async move {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Some("value".to_owned())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Some("value".to_owned()));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn sequential_calls_load_again() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let counter = Arc::clone(&invocations);
            let result = flights
                .run("key", async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Some(7)
                })
                .await;
            assert_eq!(result, Some(7));
            assert_eq!(invocations.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn absent_results_reach_every_waiter() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let flights = Arc::clone(&flights);
                tokio::spawn(async move {
                    flights
                        .run("missing", async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            None
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), None);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinct_keys_do_not_coalesce() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let flights = Arc::clone(&flights);
                let invocations = Arc::clone(&invocations);
                tokio::spawn(async move {
                    flights
                        .run(&format!("key-{i}"), async move {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Some(i)
                        })
                        .await
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), Some(i as u32));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_waiters_do_not_abort_the_load() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let first = {
            let flights = Arc::clone(&flights);
            let invocations = Arc::clone(&invocations);
            tokio::spawn(async move {
                flights
                    .run("key", async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Some(9)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        // A caller arriving inside the flight window still receives the
        // original load's result, and no second load runs.
        let result = flights.run("key", async { Some(0) }).await;
        assert_eq!(result, Some(9));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
