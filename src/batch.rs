//! Bounded-parallelism batch processor (BatchProcessor, component C9).
//!
//! Splits a sequence into contiguous batches and runs `batch_fn` once per
//! batch, up to `max_concurrent_batches` batches in flight at a time,
//! aggregating results in input order. A batch that fails aborts the
//! batches still outstanding and re-raises the first error.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::CoreError;

/// Invoked after each batch completes with the number of batches finished
/// so far and the total batch count.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct BatchProcessor {
    batch_size: usize,
    max_concurrent_batches: usize,
}

impl BatchProcessor {
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
        }
    }

    /// Process `items` in contiguous batches of `batch_size` (the last
    /// batch may be shorter), running up to `max_concurrent_batches`
    /// batches concurrently through `batch_fn`. Results are returned in
    /// input (batch) order. Empty input returns an empty result
    /// immediately without invoking `batch_fn`. If any batch errors, the
    /// remaining outstanding batches are cancelled and the first error
    /// encountered (in batch order) is returned.
    #[instrument(skip(self, items, batch_fn, progress))]
    pub async fn process<I, F, Fut, R>(
        &self,
        items: Vec<I>,
        batch_fn: F,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<R>, CoreError>
    where
        I: Send + 'static,
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CoreError>> + Send + 'static,
        R: Send + 'static,
    {
        if items.is_empty() {
            debug!("batch processor received empty input, short-circuiting");
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<I>> =
            items
                .into_iter()
                .fold(Vec::new(), |mut batches: Vec<Vec<I>>, item| {
                    match batches.last_mut() {
                        Some(last) if last.len() < self.batch_size => last.push(item),
                        _ => batches.push(vec![item]),
                    }
                    batches
                });
        let total_batches = batches.len();

        let batch_fn = Arc::new(batch_fn);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<JoinHandle<Result<R, CoreError>>> = batches
            .into_iter()
            .map(|batch| {
                let semaphore = semaphore.clone();
                let batch_fn = batch_fn.clone();
                let progress = progress.clone();
                let completed = completed.clone();
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| CoreError::internal("batch semaphore closed"))?;
                    let result = batch_fn(batch).await;
                    let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    if let Some(cb) = &progress {
                        cb(done, total_batches);
                    }
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(total_batches);
        let mut first_error: Option<CoreError> = None;

        for handle in handles {
            if first_error.is_some() {
                handle.abort();
                continue;
            }
            match handle.await {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(err)) => first_error = Some(err),
                Err(join_err) if join_err.is_cancelled() => {}
                Err(_) => first_error = Some(CoreError::internal("batch task panicked")),
            }
        }

        if let Some(err) = first_error {
            warn!(error = %err, "batch processor aborting remaining batches after failure");
            return Err(err);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_input_short_circuits_without_invoking_batch_fn() {
        let processor = BatchProcessor::new(4, 2);
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let results = processor
            .process(
                Vec::<i32>::new(),
                move |batch: Vec<i32>| {
                    invoked2.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, CoreError>(batch.iter().sum::<i32>()) }
                },
                None,
            )
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    /// batch_size=3, max_concurrent_batches=2, items 0..=9, batch_fn sums
    /// each batch, progress reports (1,4)..(4,4) exactly once each.
    #[tokio::test]
    async fn preserves_batch_order_and_reports_progress_once_per_batch() {
        let processor = BatchProcessor::new(3, 2);
        let progress_calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let progress_calls2 = progress_calls.clone();
        let progress: ProgressCallback = Arc::new(move |done, total| {
            progress_calls2.lock().unwrap().push((done, total));
        });

        let items: Vec<i32> = (0..10).collect();
        let results = processor
            .process(
                items,
                |batch: Vec<i32>| async move { Ok::<_, CoreError>(batch.iter().sum::<i32>()) },
                Some(progress),
            )
            .await
            .unwrap();

        assert_eq!(results, vec![3, 12, 21, 9]);

        let mut calls = progress_calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[tokio::test]
    async fn a_failing_batch_surfaces_as_the_overall_error() {
        let processor = BatchProcessor::new(2, 1);

        let items: Vec<i32> = (0..8).collect();
        let result = processor
            .process(
                items,
                move |batch: Vec<i32>| async move {
                    if batch[0] == 2 {
                        return Err(CoreError::internal("batch 2 exploded"));
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, CoreError>(batch.iter().sum::<i32>())
                },
                None,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
