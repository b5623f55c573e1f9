//! Bounded-concurrency task execution for IO-bound engine calls.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;

/// Runs every task factory with at most `concurrency` futures in flight,
/// starting the next queued task the instant a running one finishes.
///
/// Results come back in input order regardless of completion order. The
/// executor never short-circuits: tasks that can fail are expected to
/// resolve to their own fallback value (the chunk pipeline returns an empty
/// outcome on exhausted retries), so one slow or broken task never aborts
/// the rest of the batch.
pub async fn run_with_concurrency<T, F, Fut>(tasks: Vec<F>, concurrency: usize) -> Vec<T>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = T> + Send,
    T: Send,
{
    let concurrency = concurrency.max(1);
    let total = tasks.len();

    let mut slots: Vec<Option<T>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut queue = tasks.into_iter().enumerate();
    let mut in_flight: FuturesUnordered<Pin<Box<dyn Future<Output = (usize, T)> + Send>>> =
        FuturesUnordered::new();

    for (index, task) in queue.by_ref().take(concurrency) {
        in_flight.push(Box::pin(async move { (index, task().await) }));
    }

    while let Some((index, value)) = in_flight.next().await {
        slots[index] = Some(value);
        if let Some((next_index, task)) = queue.next() {
            in_flight.push(Box::pin(async move { (next_index, task().await) }));
        }
    }

    debug_assert!(slots.iter().all(Option::is_some));
    slots
        .into_iter()
        .map(|slot| slot.expect("every scheduled task settles exactly once"))
        .collect()
}
