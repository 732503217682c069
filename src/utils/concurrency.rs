//! Helpers for running independent units of work under a concurrency cap.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::partition::partition;
use crate::error::ConfigError;

/// Run `tasks` with at most `limit` in flight at once.
///
/// Results come back in the same order as `tasks`, regardless of which
/// finishes first.
pub async fn run_with_concurrency<I, Fut>(
    limit: usize,
    tasks: I,
) -> Result<Vec<Fut::Output>, ConfigError>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future,
{
    if limit < 1 {
        return Err(ConfigError::invalid("concurrency limit must be at least 1"));
    }

    let semaphore = Arc::new(Semaphore::new(limit));
    let guarded = tasks.into_iter().map(|task| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = semaphore.acquire().await.ok();
            task.await
        }
    });

    Ok(join_all(guarded).await)
}

/// Partition `items` into chunks and run `f` over each chunk with at most
/// `max_concurrent` chunks in flight. Results follow chunk order.
pub async fn process_in_chunks<T, F, Fut>(
    items: Vec<T>,
    chunk_size: usize,
    f: F,
    max_concurrent: usize,
) -> Result<Vec<Fut::Output>, ConfigError>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future,
{
    let chunks = partition(items, chunk_size)?;
    run_with_concurrency(max_concurrent, chunks.into_iter().map(f)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_follow_input_order() {
        // Later tasks finish first.
        let tasks = (0..5u64).map(|i| async move {
            tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
            i
        });
        let results = run_with_concurrency(5, tasks).await.unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..12).map(|_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });

        run_with_concurrency(3, tasks).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let tasks = vec![async { 1 }];
        assert!(run_with_concurrency(0, tasks).await.is_err());
    }

    #[tokio::test]
    async fn test_process_in_chunks_sums() {
        let items: Vec<u32> = (1..=23).collect();
        let sums = process_in_chunks(
            items,
            5,
            |chunk| async move { chunk.iter().sum::<u32>() },
            2,
        )
        .await
        .unwrap();

        assert_eq!(sums, vec![15, 40, 65, 90, 66]);
        assert_eq!(sums.iter().sum::<u32>(), 276);
    }

    #[tokio::test]
    async fn test_process_in_chunks_rejects_zero_chunk() {
        let result = process_in_chunks(vec![1], 0, |c| async move { c.len() }, 1).await;
        assert!(result.is_err());
    }
}
