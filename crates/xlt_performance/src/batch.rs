//! Per-batch-ID request accumulator, flushed by size or deadline
//! (`spec.md` §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

type Processor<T, R> = Arc<dyn Fn(Vec<T>) -> R + Send + Sync>;

struct Pending<T> {
    items: Vec<T>,
    deadline: tokio::time::Instant,
}

/// Accumulates items under a batch ID, flushing through a user-supplied
/// processor exactly once per batch: either when the batch reaches
/// `batch_size`, or when `batch_timeout` elapses since the first item in
/// the batch, whichever comes first.
pub struct BatchProcessor<T, R> {
    batch_size: usize,
    batch_timeout: Duration,
    processor: Processor<T, R>,
    pending: Mutex<HashMap<String, Pending<T>>>,
}

impl<T: Send + 'static, R: Send + 'static> BatchProcessor<T, R> {
    pub fn new<F>(batch_size: usize, batch_timeout: Duration, processor: F) -> Arc<Self>
    where
        F: Fn(Vec<T>) -> R + Send + Sync + 'static,
    {
        Arc::new(Self { batch_size: batch_size.max(1), batch_timeout, processor: Arc::new(processor), pending: Mutex::new(HashMap::new()) })
    }

    /// Adds `item` to `batch_id`'s accumulator. Returns `Some(result)` if
    /// this push triggered a size-based flush.
    pub fn push(&self, batch_id: &str, item: T) -> Option<R> {
        let mut pending = self.pending.lock();
        let entry = pending.entry(batch_id.to_string()).or_insert_with(|| Pending {
            items: Vec::new(),
            deadline: tokio::time::Instant::now() + self.batch_timeout,
        });
        entry.items.push(item);

        if entry.items.len() >= self.batch_size {
            let Pending { items, .. } = pending.remove(batch_id).unwrap();
            drop(pending);
            return Some((self.processor)(items));
        }
        None
    }

    /// Flushes `batch_id` if its deadline has passed. Meant to be polled by
    /// a background task driving `tokio::time::sleep_until` per batch, or
    /// called opportunistically.
    pub fn flush_if_due(&self, batch_id: &str) -> Option<R> {
        let mut pending = self.pending.lock();
        let due = pending.get(batch_id).map(|p| p.deadline <= tokio::time::Instant::now()).unwrap_or(false);
        if !due {
            return None;
        }
        let Pending { items, .. } = pending.remove(batch_id)?;
        drop(pending);
        Some((self.processor)(items))
    }

    /// Drains every pending batch synchronously regardless of size or
    /// deadline, per `spec.md` §4.8 `FlushAll`.
    pub fn flush_all(&self) -> Vec<R> {
        let drained: Vec<Vec<T>> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p.items).collect()
        };
        drained.into_iter().map(|items| (self.processor)(items)).collect()
    }

    pub fn pending_batch_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn flushes_when_batch_size_is_reached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let processor = BatchProcessor::new(2, Duration::from_secs(60), move |items: Vec<i32>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            items.iter().sum::<i32>()
        });

        assert!(processor.push("b1", 1).is_none());
        let result = processor.push("b1", 2);
        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.pending_batch_count(), 0);
    }

    #[tokio::test]
    async fn flush_if_due_drains_after_the_deadline() {
        let processor = BatchProcessor::new(10, Duration::from_millis(5), |items: Vec<i32>| items.len());
        processor.push("b1", 1);
        assert!(processor.flush_if_due("b1").is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(processor.flush_if_due("b1"), Some(1));
    }

    #[tokio::test]
    async fn flush_all_drains_every_pending_batch_synchronously() {
        let processor = BatchProcessor::new(100, Duration::from_secs(60), |items: Vec<i32>| items.len());
        processor.push("b1", 1);
        processor.push("b2", 2);
        processor.push("b2", 3);
        let mut results = processor.flush_all();
        results.sort();
        assert_eq!(results, vec![1, 2]);
        assert_eq!(processor.pending_batch_count(), 0);
    }

    #[tokio::test]
    async fn separate_batch_ids_accumulate_independently() {
        let processor = BatchProcessor::new(2, Duration::from_secs(60), |items: Vec<i32>| items.len());
        processor.push("a", 1);
        processor.push("b", 1);
        assert_eq!(processor.pending_batch_count(), 2);
    }
}
