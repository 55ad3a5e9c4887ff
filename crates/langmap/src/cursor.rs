//! Fault-tolerant keyset-paginated iteration over a [`RecordStore`].
//!
//! The cursor fetches pages in ascending key order, using the last key of
//! the previous page as an exclusive lower bound, and hands every record to a
//! callback. Callback failures are logged and counted but never stop the
//! scan; only a failing store (estimate or page fetch) ends the run.

use crate::error::StoreError;
use crate::record::Keyed;
use crate::store::RecordStore;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::future::Future;
use std::time::Duration;

type KeyOf<S> = <<S as RecordStore>::Record as Keyed>::Key;

/// How the callbacks of one page are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Every callback of a page is started at once; the page waits for all.
    #[default]
    Concurrent,
    /// Callback `i + 1` starts only after callback `i` settled. Required when
    /// callbacks read-modify-write records that several inputs map onto.
    Sequential,
}

#[derive(Debug, Clone)]
pub struct CursorOptions<K> {
    pub batch_size: usize,
    pub limit: Option<u64>,
    /// Resume strictly after this key.
    pub resume_key: Option<K>,
    pub mode: ExecutionMode,
    pub show_progress: bool,
}

impl<K> Default for CursorOptions<K> {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            limit: None,
            resume_key: None,
            mode: ExecutionMode::Concurrent,
            show_progress: false,
        }
    }
}

/// Mutable state of one scan. Owned by the loop in [`BatchCursor::run`].
#[derive(Debug, Clone)]
pub struct BatchCursorState<K> {
    pub last_key: Option<K>,
    pub batch_size: usize,
    pub limit: u64,
    pub done: u64,
    pub failed: u64,
    /// `min(limit, estimated collection size)`, computed once. Display only.
    pub estimated_total: u64,
}

impl<K> BatchCursorState<K> {
    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.done)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorSummary<K> {
    /// Records handed to the callback, failed ones included.
    pub processed: u64,
    pub failed: u64,
    /// Persist this to resume a later scan after the last processed record.
    pub last_key: Option<K>,
}

type FailureHook<'a, K> = Box<dyn Fn(&K, &str) + Send + Sync + 'a>;

pub struct BatchCursor<'a, S: RecordStore> {
    store: &'a S,
    options: CursorOptions<KeyOf<S>>,
    on_failure: Option<FailureHook<'a, KeyOf<S>>>,
    label: String,
}

impl<'a, S: RecordStore> BatchCursor<'a, S> {
    pub fn new(store: &'a S, options: CursorOptions<KeyOf<S>>) -> Self {
        Self {
            store,
            options,
            on_failure: None,
            label: String::from("records"),
        }
    }

    /// Called with the key and error message of every failed callback.
    pub fn on_failure(mut self, hook: impl Fn(&KeyOf<S>, &str) + Send + Sync + 'a) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Name shown next to the progress bar and in log lines.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub async fn run<F, Fut, E>(&self, mut callback: F) -> Result<CursorSummary<KeyOf<S>>, StoreError>
    where
        F: FnMut(S::Record) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let limit = self.options.limit.unwrap_or(u64::MAX);
        let estimated = self.store.estimated_count().await?;

        let mut state = BatchCursorState {
            last_key: self.options.resume_key.clone(),
            batch_size: self.options.batch_size.max(1),
            limit,
            done: 0,
            failed: 0,
            estimated_total: estimated.min(limit),
        };

        tracing::info!(
            label = %self.label,
            estimated_total = state.estimated_total,
            batch_size = state.batch_size,
            mode = ?self.options.mode,
            resume_key = ?state.last_key,
            "Retrieving records..."
        );

        let progress = self.progress_bar(state.estimated_total);

        loop {
            let remaining = state.remaining();
            if remaining == 0 {
                break;
            }
            let wanted = (state.batch_size as u64).min(remaining) as usize;

            let page = match self.store.find_after(state.last_key.as_ref(), wanted).await {
                Ok(page) => page,
                Err(e) => {
                    progress.abandon();
                    tracing::error!(label = %self.label, done = state.done, error = %e, "Page fetch failed");
                    return Err(e);
                }
            };

            let fetched = page.len();
            if let Some(last) = page.last() {
                state.last_key = Some(last.key().clone());
            }

            match self.options.mode {
                ExecutionMode::Sequential => {
                    for record in page {
                        let key = record.key().clone();
                        let outcome = callback(record).await;
                        progress.inc(1);
                        if let Err(e) = outcome {
                            self.report_failure(&mut state, &key, &e);
                        }
                    }
                }
                ExecutionMode::Concurrent => {
                    let calls = page.into_iter().map(|record| {
                        let key = record.key().clone();
                        let call = callback(record);
                        let progress = &progress;
                        async move {
                            let outcome = call.await;
                            progress.inc(1);
                            (key, outcome)
                        }
                    });
                    for (key, outcome) in join_all(calls).await {
                        if let Err(e) = outcome {
                            self.report_failure(&mut state, &key, &e);
                        }
                    }
                }
            }

            state.done += fetched as u64;

            if fetched < wanted {
                break;
            }
        }

        progress.finish_and_clear();
        tracing::info!(
            label = %self.label,
            processed = state.done,
            failed = state.failed,
            "Finished processing records"
        );

        Ok(CursorSummary {
            processed: state.done,
            failed: state.failed,
            last_key: state.last_key,
        })
    }

    fn report_failure<E: fmt::Display>(
        &self,
        state: &mut BatchCursorState<KeyOf<S>>,
        key: &KeyOf<S>,
        error: &E,
    ) {
        state.failed += 1;
        let message = error.to_string();
        tracing::warn!(label = %self.label, key = ?key, error = %message, "Record callback failed; continuing");
        if let Some(hook) = &self.on_failure {
            hook(key, &message);
        }
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.options.show_progress || total == 0 {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg} (ETA {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█░"),
        );
        pb.set_message(self.label.clone());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u64,
    }

    impl Keyed for Item {
        type Key = u64;

        fn key(&self) -> &u64 {
            &self.id
        }
    }

    fn store_of(n: u64) -> MemoryStore<Item> {
        MemoryStore::from_records((1..=n).map(|id| Item { id }))
    }

    fn options(batch_size: usize, limit: Option<u64>, mode: ExecutionMode) -> CursorOptions<u64> {
        CursorOptions {
            batch_size,
            limit,
            mode,
            ..CursorOptions::default()
        }
    }

    async fn collect_ids(store: &MemoryStore<Item>, opts: CursorOptions<u64>) -> Vec<u64> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cursor = BatchCursor::new(store, opts);
        cursor
            .run(|item: Item| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(item.id);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();
        let ids = seen.lock().clone();
        ids
    }

    #[tokio::test]
    async fn test_processes_min_of_size_and_limit_exactly_once() {
        for (size, batch, limit) in [(10, 3, None), (10, 3, Some(7)), (10, 4, Some(100)), (9, 3, Some(9)), (0, 5, None)] {
            let store = store_of(size);
            let mut ids = collect_ids(&store, options(batch, limit, ExecutionMode::Concurrent)).await;
            ids.sort_unstable();
            let expected_len = limit.map_or(size, |l| l.min(size));
            assert_eq!(ids, (1..=expected_len).collect::<Vec<_>>(), "size={size} batch={batch} limit={limit:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_mode_preserves_key_order() {
        let store = store_of(25);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cursor = BatchCursor::new(&store, options(6, None, ExecutionMode::Sequential));
        cursor
            .run(|item: Item| {
                let seen = seen.clone();
                async move {
                    // Earlier keys sleep longer; ordering must not depend on it.
                    tokio::time::sleep(Duration::from_millis(30 - item.id)).await;
                    seen.lock().push(item.id);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();
        let ids = seen.lock().clone();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_callbacks_never_overlap() {
        let store = store_of(12);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let cursor = BatchCursor::new(&store, options(5, None, ExecutionMode::Sequential));
        cursor
            .run(|_item: Item| {
                let in_flight = in_flight.clone();
                let max_in_flight = max_in_flight.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mode_overlaps_callbacks_within_a_page() {
        let store = store_of(8);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let cursor = BatchCursor::new(&store, options(4, None, ExecutionMode::Concurrent));
        cursor
            .run(|_item: Item| {
                let in_flight = in_flight.clone();
                let max_in_flight = max_in_flight.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_callback_failures_are_isolated() {
        let store = store_of(10);
        let failed_keys = Arc::new(Mutex::new(Vec::new()));
        let hook_keys = failed_keys.clone();
        let visited = Arc::new(AtomicUsize::new(0));

        for mode in [ExecutionMode::Concurrent, ExecutionMode::Sequential] {
            failed_keys.lock().clear();
            visited.store(0, Ordering::SeqCst);
            let hook_keys = hook_keys.clone();
            let cursor = BatchCursor::new(&store, options(3, None, mode))
                .on_failure(move |key, _message| hook_keys.lock().push(*key));
            let summary = cursor
                .run(|item: Item| {
                    let visited = visited.clone();
                    async move {
                        visited.fetch_add(1, Ordering::SeqCst);
                        if item.id % 4 == 0 {
                            Err(format!("bad record {}", item.id))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
                .unwrap();

            assert_eq!(summary.processed, 10);
            assert_eq!(summary.failed, 2);
            assert_eq!(summary.last_key, Some(10));
            assert_eq!(visited.load(Ordering::SeqCst), 10);
            let mut keys = failed_keys.lock().clone();
            keys.sort_unstable();
            assert_eq!(keys, vec![4, 8]);
        }
    }

    #[tokio::test]
    async fn test_resume_key_skips_processed_records() {
        let store = store_of(10);
        let first = BatchCursor::new(&store, options(3, Some(4), ExecutionMode::Sequential))
            .run(|_item: Item| async { Ok::<(), String>(()) })
            .await
            .unwrap();
        assert_eq!(first.last_key, Some(4));

        let resumed = CursorOptions {
            resume_key: first.last_key,
            ..options(3, None, ExecutionMode::Sequential)
        };
        let ids = collect_ids(&store, resumed).await;
        assert_eq!(ids, (5..=10).collect::<Vec<_>>());
    }

    struct BrokenStore {
        fail_estimate: bool,
        pages_before_failure: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for BrokenStore {
        type Record = Item;

        async fn find_after(&self, after: Option<&u64>, limit: usize) -> Result<Vec<Item>, StoreError> {
            if self.pages_before_failure.load(Ordering::SeqCst) == 0 {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.pages_before_failure.fetch_sub(1, Ordering::SeqCst);
            let start = after.map_or(1, |k| k + 1);
            Ok((start..start + limit as u64).map(|id| Item { id }).collect())
        }

        async fn estimated_count(&self) -> Result<u64, StoreError> {
            if self.fail_estimate {
                Err(StoreError::Unavailable("no estimate".into()))
            } else {
                Ok(1_000)
            }
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_fatal() {
        let store = BrokenStore {
            fail_estimate: true,
            pages_before_failure: AtomicUsize::new(10),
        };
        let result = BatchCursor::new(&store, options(5, None, ExecutionMode::Concurrent))
            .run(|_item: Item| async { Ok::<(), String>(()) })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let store = BrokenStore {
            fail_estimate: false,
            pages_before_failure: AtomicUsize::new(2),
        };
        let visited = Arc::new(AtomicUsize::new(0));
        let result = BatchCursor::new(&store, options(5, None, ExecutionMode::Concurrent))
            .run(|_item: Item| {
                let visited = visited.clone();
                async move {
                    visited.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(visited.load(Ordering::SeqCst), 10);
    }
}
