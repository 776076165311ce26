//! Grouping of concurrent calls by key into batched calls.
//!
//! Every [`Coalescer::submit`] call appends an entry to its key's pending
//! list. The first entry of an empty list spawns a drain task which waits
//! according to the [`Deferral`] policy and then hands a [`Batch`] to the
//! [`BatchHandler`]. The handler pulls the entries (all of them, or in bounded
//! parts) and answers each one through its reply channel.
//!
//! Entries are pulled in submission order. Submissions made after the handler
//! has pulled start a new batch.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{MegaError, Result};

/// When the drain task of a new batch hands it to the handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deferral {
    /// As soon as the drain task is scheduled. The handler is expected to
    /// await something before pulling, so late submissions still join.
    Immediate,
    /// After the drain task has yielded once. All calls submitted before the
    /// submitting task gives control back to the scheduler share a batch.
    #[default]
    Yield,
    /// After a timer round-trip of the runtime.
    NextTick,
    /// After a fixed delay.
    Delay(Duration),
}

impl Deferral {
    async fn wait(self) {
        match self {
            Deferral::Immediate => {}
            Deferral::Yield => tokio::task::yield_now().await,
            Deferral::NextTick => tokio::time::sleep(Duration::ZERO).await,
            Deferral::Delay(delay) => tokio::time::sleep(delay).await,
        }
    }
}

/// Handles the batches of one [`Coalescer`].
#[async_trait]
pub trait BatchHandler<K, V, R>: Send + Sync + 'static {
    /// Answer a call without enqueuing it.
    fn ready_result(&self, _key: &K, _value: &V) -> Option<R> {
        None
    }

    /// Process a batch.
    ///
    /// Returning an error before pulling rejects every pending entry of the
    /// batch with it. Entries pulled and dropped unanswered observe
    /// [`MegaError::Dropped`].
    async fn handle(&self, batch: Batch<K, V, R>) -> Result<()>;
}

/// One pending call.
#[derive(Debug)]
pub struct Entry<V, R> {
    value: V,
    reply: oneshot::Sender<Result<R>>,
}

impl<V, R> Entry<V, R> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn resolve(self, result: R) {
        self.settle(Ok(result));
    }

    pub fn reject(self, error: MegaError) {
        self.settle(Err(error));
    }

    pub fn settle(self, result: Result<R>) {
        // The caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

type Queue<K, V, R> = Mutex<HashMap<K, Vec<Entry<V, R>>>>;

struct Shared<K, V, R> {
    handler: Arc<dyn BatchHandler<K, V, R>>,
    deferral: Deferral,
    queue: Queue<K, V, R>,
}

impl<K, V, R> Shared<K, V, R>
where
    K: Eq + Hash,
{
    fn queue(&self) -> MutexGuard<'_, HashMap<K, Vec<Entry<V, R>>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self, key: &K) -> Vec<Entry<V, R>> {
        self.queue().remove(key).unwrap_or_default()
    }
}

/// The entries of one key, handed to [`BatchHandler::handle`].
pub struct Batch<K, V, R> {
    key: K,
    first: V,
    shared: Arc<Shared<K, V, R>>,
    pulled: Arc<AtomicBool>,
}

impl<K, V, R> Batch<K, V, R>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Value of the entry that opened the batch.
    pub fn first(&self) -> &V {
        &self.first
    }

    /// Remove and return every entry queued for the key.
    ///
    /// Only the first call returns entries.
    pub fn pull(&mut self) -> Vec<Entry<V, R>> {
        if self.pulled.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        self.shared.take(&self.key)
    }

    /// Pull the entries and yield them in chunks of at most `size`.
    ///
    /// A `size` of `0` yields a single chunk.
    pub fn parts(
        &mut self,
        size: usize,
    ) -> impl Iterator<Item = Vec<Entry<V, R>>> + use<K, V, R> {
        let size = if size == 0 { usize::MAX } else { size };
        let mut entries = self.pull().into_iter();
        std::iter::from_fn(move || {
            let part: Vec<_> = entries.by_ref().take(size).collect();
            (!part.is_empty()).then_some(part)
        })
    }
}

/// Rejects whatever the handler left in the queue, including on panic or
/// cancellation of the drain task.
struct DrainGuard<K, V, R>
where
    K: Eq + Hash,
{
    key: Option<K>,
    shared: Arc<Shared<K, V, R>>,
    pulled: Arc<AtomicBool>,
    error: Option<MegaError>,
}

impl<K, V, R> Drop for DrainGuard<K, V, R>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if self.pulled.load(Ordering::SeqCst) {
            return;
        }

        let entries = self.shared.take(&key);
        let error = self.error.take().unwrap_or(MegaError::Dropped);
        if !entries.is_empty() {
            debug!(count = entries.len(), %error, "rejecting unpulled batch entries");
        }
        for entry in entries {
            entry.reject(error.clone());
        }
    }
}

/// Merges concurrent calls sharing a key into one handler invocation.
pub struct Coalescer<K, V, R> {
    shared: Arc<Shared<K, V, R>>,
}

impl<K, V, R> Clone for Coalescer<K, V, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K, V, R> std::fmt::Debug for Coalescer<K, V, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("deferral", &self.shared.deferral)
            .finish_non_exhaustive()
    }
}

impl<K, V, R> Coalescer<K, V, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new<H>(handler: Arc<H>, deferral: Deferral) -> Self
    where
        H: BatchHandler<K, V, R>,
    {
        Self {
            shared: Arc::new(Shared {
                handler,
                deferral,
                queue: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of keys with entries waiting to be pulled.
    pub fn pending_keys(&self) -> usize {
        self.shared.queue().len()
    }

    /// Enqueue a call and return a future for its result.
    ///
    /// The entry is queued when this function is called, not when the
    /// returned future is first polled. Must be called inside a tokio runtime.
    pub fn submit(
        &self,
        key: K,
        value: V,
    ) -> impl Future<Output = Result<R>> + Send + use<K, V, R> {
        let receiver = match self.shared.handler.ready_result(&key, &value) {
            Some(result) => Ok(result),
            None => Err(self.enqueue(key, value)),
        };

        async move {
            match receiver {
                Ok(result) => Ok(result),
                Err(rx) => rx.await.unwrap_or(Err(MegaError::Dropped)),
            }
        }
    }

    fn enqueue(&self, key: K, value: V) -> oneshot::Receiver<Result<R>> {
        let (reply, rx) = oneshot::channel();

        let opened = {
            let mut queue = self.shared.queue();
            let entries = queue.entry(key.clone()).or_default();
            entries.push(Entry {
                value: value.clone(),
                reply,
            });
            entries.len() == 1
        };

        if opened {
            self.spawn_drain(key, value);
        }
        rx
    }

    fn spawn_drain(&self, key: K, first: V) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.deferral.wait().await;

            let pulled = Arc::new(AtomicBool::new(false));
            let mut guard = DrainGuard {
                key: Some(key.clone()),
                shared: shared.clone(),
                pulled: pulled.clone(),
                error: None,
            };
            let batch = Batch {
                key,
                first,
                shared: shared.clone(),
                pulled,
            };

            if let Err(error) = shared.handler.handle(batch).await {
                debug!(%error, "batch handler failed");
                guard.error = Some(error);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum Mode {
        Double,
        FailBeforePull,
        DropAfterPull,
        IgnoreBatch,
        WaitThenDouble,
    }

    struct Recorder {
        mode: Mode,
        calls: Mutex<Vec<(String, Vec<u32>)>>,
    }

    impl Recorder {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Vec<u32>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchHandler<String, u32, u32> for Recorder {
        fn ready_result(&self, _key: &String, value: &u32) -> Option<u32> {
            (*value == 0).then_some(0)
        }

        async fn handle(&self, mut batch: Batch<String, u32, u32>) -> Result<()> {
            match self.mode {
                Mode::FailBeforePull => return Err(MegaError::from_code(-9)),
                Mode::IgnoreBatch => return Ok(()),
                Mode::WaitThenDouble => tokio::time::sleep(Duration::from_millis(10)).await,
                _ => {}
            }

            let entries = batch.pull();
            let values: Vec<u32> = entries.iter().map(|e| *e.value()).collect();
            self.calls
                .lock()
                .unwrap()
                .push((batch.key().clone(), values));

            if let Mode::DropAfterPull = self.mode {
                return Err(MegaError::InvalidResponse);
            }
            for entry in entries {
                let doubled = entry.value() * 2;
                entry.resolve(doubled);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_key_single_batch() {
        let recorder = Recorder::new(Mode::Double);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        let a = coalescer.submit("k".to_string(), 1);
        let b = coalescer.submit("k".to_string(), 2);
        let c = coalescer.submit("k".to_string(), 3);
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (2, 4, 6));
        assert_eq!(recorder.calls(), vec![("k".to_string(), vec![1, 2, 3])]);
        assert_eq!(coalescer.pending_keys(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_distinct_batches() {
        let recorder = Recorder::new(Mode::Double);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        let a = coalescer.submit("x".to_string(), 1);
        let b = coalescer.submit("y".to_string(), 2);
        let c = coalescer.submit("x".to_string(), 3);
        let (a, b, c) = tokio::join!(a, b, c);
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (2, 4, 6));

        let mut calls = recorder.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("x".to_string(), vec![1, 3]),
                ("y".to_string(), vec![2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_later_submission_opens_new_batch() {
        let recorder = Recorder::new(Mode::Double);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        assert_eq!(coalescer.submit("k".to_string(), 1).await.unwrap(), 2);
        assert_eq!(coalescer.submit("k".to_string(), 2).await.unwrap(), 4);
        assert_eq!(recorder.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_ready_result_skips_handler() {
        let recorder = Recorder::new(Mode::Double);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        assert_eq!(coalescer.submit("k".to_string(), 0).await.unwrap(), 0);
        assert!(recorder.calls().is_empty());
        assert_eq!(coalescer.pending_keys(), 0);
    }

    #[tokio::test]
    async fn test_error_reaches_every_entry() {
        let recorder = Recorder::new(Mode::FailBeforePull);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        let a = coalescer.submit("k".to_string(), 1);
        let b = coalescer.submit("k".to_string(), 2);
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap_err().api_code(), Some(-9));
        assert_eq!(b.unwrap_err().api_code(), Some(-9));
        assert_eq!(coalescer.pending_keys(), 0);
    }

    #[tokio::test]
    async fn test_pulled_and_dropped_entries() {
        let recorder = Recorder::new(Mode::DropAfterPull);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        let a = coalescer.submit("k".to_string(), 1).await;
        assert!(matches!(a, Err(MegaError::Dropped)));
    }

    #[tokio::test]
    async fn test_unpulled_ok_batch_is_dropped() {
        let recorder = Recorder::new(Mode::IgnoreBatch);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Yield);

        let a = coalescer.submit("k".to_string(), 1).await;
        assert!(matches!(a, Err(MegaError::Dropped)));
        assert_eq!(coalescer.pending_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_handler_pulls_lazily() {
        let recorder = Recorder::new(Mode::WaitThenDouble);
        let coalescer = Coalescer::new(recorder.clone(), Deferral::Immediate);

        let a = coalescer.submit("k".to_string(), 1);
        tokio::task::yield_now().await;
        // The handler is already waiting; this entry still joins its batch
        let b = coalescer.submit("k".to_string(), 2);

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), (2, 4));
        assert_eq!(recorder.calls(), vec![("k".to_string(), vec![1, 2])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_widens_window() {
        let recorder = Recorder::new(Mode::Double);
        let coalescer =
            Coalescer::new(recorder.clone(), Deferral::Delay(Duration::from_millis(50)));

        let a = coalescer.submit("k".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = coalescer.submit("k".to_string(), 2);

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), (2, 4));
        assert_eq!(recorder.calls().len(), 1);
    }

    struct Splitter {
        size: usize,
        parts: Mutex<Vec<Vec<u32>>>,
    }

    impl Splitter {
        fn new(size: usize) -> Arc<Self> {
            Arc::new(Self {
                size,
                parts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BatchHandler<String, u32, u32> for Splitter {
        async fn handle(&self, mut batch: Batch<String, u32, u32>) -> Result<()> {
            assert_eq!(*batch.first(), 1);
            for part in batch.parts(self.size) {
                self.parts
                    .lock()
                    .unwrap()
                    .push(part.iter().map(|e| *e.value()).collect());
                for entry in part {
                    let value = *entry.value();
                    entry.resolve(value);
                }
            }
            assert!(batch.pull().is_empty());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_parts_split_in_order() {
        let splitter = Splitter::new(2);
        let coalescer = Coalescer::new(splitter.clone(), Deferral::Yield);

        let futures: Vec<_> = (1..=5)
            .map(|v| coalescer.submit("k".to_string(), v))
            .collect();
        let results: Vec<u32> = futures::future::join_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            *splitter.parts.lock().unwrap(),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
    }

    #[tokio::test]
    async fn test_parts_of_zero_is_one_chunk() {
        let splitter = Splitter::new(0);
        let coalescer = Coalescer::new(splitter.clone(), Deferral::Yield);

        let futures: Vec<_> = (1..=3)
            .map(|v| coalescer.submit("k".to_string(), v))
            .collect();
        for result in futures::future::join_all(futures).await {
            result.unwrap();
        }
        assert_eq!(*splitter.parts.lock().unwrap(), vec![vec![1, 2, 3]]);
    }
}
