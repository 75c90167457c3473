//! Coalescing write queue: many producers, one background flusher.
//!
//! Producers insert straight into a shared accumulator and notify the
//! flusher. The flusher wakes on notify or after an idle interval, swaps in
//! a fresh accumulator and hands the drained batch to the flush action, so a
//! write can never be lost to a concurrent flush. Failed flushes are logged
//! and the batch is dropped; there is no retry.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accumulator for pending writes; `Default` produces the fresh, empty batch
/// swapped in on every flush cycle
pub trait Batch: Default + Send + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Batch for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl<K: Ord + Send + 'static, V: Send + 'static> Batch for BTreeMap<K, V> {
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

/// Asynchronous action persisting one drained batch
pub type FlushAction<B> = Arc<dyn Fn(B) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteQueueConfig {
    /// Fallback wake-up when no producer has notified
    pub idle_interval: Duration,
    /// How long `stop` waits for the flusher before forcing a final flush
    pub stop_grace: Duration,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("write queue '{0}' is stopped")]
    Stopped(&'static str),
}

struct Pending<B> {
    batch: B,
    closed: bool,
}

struct Shared<B> {
    name: &'static str,
    pending: Mutex<Pending<B>>,
    notify: Notify,
    flush: FlushAction<B>,
}

impl<B: Batch> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, Pending<B>> {
        // A panicking producer closure cannot leave the batch half-swapped
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self) -> B {
        std::mem::take(&mut self.lock().batch)
    }

    async fn flush_pending(&self) {
        let batch = self.take();
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        match (self.flush)(batch).await {
            Ok(()) => debug!(queue = self.name, count, "flushed batch"),
            Err(e) => error!(
                queue = self.name,
                count,
                error = format!("{:#}", e),
                "flush failed, dropping batch"
            ),
        }
    }

    async fn run(self: Arc<Self>, idle_interval: Duration, shutdown: CancellationToken) {
        debug!(queue = self.name, "write queue flusher started");

        loop {
            let stopping = tokio::select! {
                _ = shutdown.cancelled() => true,
                _ = self.notify.notified() => false,
                _ = tokio::time::sleep(idle_interval) => false,
            };

            self.flush_pending().await;

            if stopping {
                break;
            }
        }

        debug!(queue = self.name, "write queue flusher stopped");
    }
}

/// Accumulate-then-flush background writer with a single consumer task
pub struct WriteQueue<B: Batch> {
    shared: Arc<Shared<B>>,
    config: WriteQueueConfig,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl<B: Batch> WriteQueue<B> {
    pub fn new(name: &'static str, config: WriteQueueConfig, flush: FlushAction<B>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                pending: Mutex::new(Pending {
                    batch: B::default(),
                    closed: false,
                }),
                notify: Notify::new(),
                flush,
            }),
            config,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Spawn the flusher task on the current runtime; later calls are no-ops
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() || self.shutdown.is_cancelled() {
            warn!(queue = self.name(), "write queue already started or stopped");
            return;
        }

        info!(
            queue = self.name(),
            idle_interval_ms = self.config.idle_interval.as_millis(),
            "starting write queue"
        );
        *task = Some(tokio::spawn(
            self.shared
                .clone()
                .run(self.config.idle_interval, self.shutdown.clone()),
        ));
    }

    /// Insert into the shared accumulator, then wake the flusher
    ///
    /// Never blocks on I/O. Fails once `stop` has begun.
    pub fn enqueue<F>(&self, write: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut B),
    {
        {
            let mut pending = self.shared.lock();
            if pending.closed {
                return Err(QueueError::Stopped(self.name()));
            }
            write(&mut pending.batch);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Number of writes waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.shared.lock().batch.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().closed
    }

    /// Reject further writes; whatever is already pending stays for `stop`
    pub fn close(&self) {
        self.shared.lock().closed = true;
    }

    /// Close the queue, drain and flush what is pending, then return
    ///
    /// Waits up to `stop_grace` for the flusher to finish its in-flight and
    /// final flush; past that the flusher is aborted and the remaining batch
    /// is flushed here.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close();

        info!(queue = self.name(), "stopping write queue");
        self.shutdown.cancel();

        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.stop_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(queue = self.name(), error = %e, "write queue flusher failed"),
                Err(_) => {
                    warn!(
                        queue = self.name(),
                        grace_ms = self.config.stop_grace.as_millis(),
                        "flusher did not finish within grace period, forcing final flush"
                    );
                    handle.abort();
                }
            }
        }

        self.shared.flush_pending().await;
        info!(queue = self.name(), "write queue stopped");
    }
}

impl<B: Batch> Drop for WriteQueue<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn recording_flush<T: Send + 'static>() -> (FlushAction<Vec<T>>, mpsc::UnboundedReceiver<Vec<T>>)
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let flush: FlushAction<Vec<T>> = Arc::new(move |batch| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(batch).map_err(|_| anyhow::anyhow!("receiver dropped"))?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        (flush, rx)
    }

    fn slow_idle() -> WriteQueueConfig {
        WriteQueueConfig {
            idle_interval: Duration::from_secs(3600),
            stop_grace: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_notify_triggers_flush() {
        let (flush, mut rx) = recording_flush::<u32>();
        let queue = WriteQueue::new("test", slow_idle(), flush);
        queue.start();

        queue.enqueue(|batch| batch.push(1)).unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("flush should happen on notify")
            .unwrap();
        assert_eq!(batch, vec![1]);
        assert_eq!(queue.pending_len(), 0);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_writes_during_flush_coalesce_into_next_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u32>>();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let flush_gate = gate.clone();
        let flush: FlushAction<Vec<u32>> = Arc::new(move |batch| {
            let tx = tx.clone();
            let gate = flush_gate.clone();
            Box::pin(async move {
                gate.acquire().await?.forget();
                tx.send(batch)?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        let queue = WriteQueue::new("test", slow_idle(), flush);
        queue.start();

        queue.enqueue(|batch| batch.push(1)).unwrap();
        // Wait for the flusher to take the first batch and block on the gate
        while queue.pending_len() != 0 {
            tokio::task::yield_now().await;
        }
        for i in 2..=4 {
            queue.enqueue(|batch| batch.push(i)).unwrap();
        }

        gate.add_permits(2);
        let first = rx.recv().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![2, 3, 4]);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_and_rejects_later_writes() {
        let (flush, mut rx) = recording_flush::<u32>();
        // Never started: only stop can flush
        let queue = WriteQueue::new("test", slow_idle(), flush);

        queue.enqueue(|batch| batch.push(1)).unwrap();
        queue.enqueue(|batch| batch.push(2)).unwrap();

        queue.stop().await;

        assert_eq!(
            queue.enqueue(|batch| batch.push(3)),
            Err(QueueError::Stopped("test"))
        );
        assert!(queue.is_stopped());
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_writes_but_keeps_pending_for_stop() {
        let (flush, mut rx) = recording_flush::<u32>();
        let queue = WriteQueue::new("test", slow_idle(), flush);

        queue.enqueue(|batch| batch.push(1)).unwrap();
        queue.close();

        assert_eq!(
            queue.enqueue(|batch| batch.push(2)),
            Err(QueueError::Stopped("test"))
        );
        assert_eq!(queue.pending_len(), 1);
        assert!(rx.try_recv().is_err());

        queue.stop().await;
        assert_eq!(rx.recv().await.unwrap(), vec![1]);

        // Second stop is a no-op
        queue.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_drains_running_flusher() {
        let (flush, mut rx) = recording_flush::<u32>();
        let queue = WriteQueue::new("test", slow_idle(), flush);
        queue.start();

        for i in 0..100 {
            queue.enqueue(|batch| batch.push(i)).unwrap();
        }
        queue.stop().await;

        let mut flushed = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            flushed.extend(batch);
        }
        assert_eq!(flushed, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_flush_is_dropped_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u32>>();
        let flush_calls = calls.clone();
        let flush: FlushAction<Vec<u32>> = Arc::new(move |batch| {
            let tx = tx.clone();
            let n = flush_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    anyhow::bail!("database unavailable");
                }
                tx.send(batch)?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        let queue = WriteQueue::new("test", slow_idle(), flush);
        queue.start();

        queue.enqueue(|batch| batch.push(1)).unwrap();
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        queue.enqueue(|batch| batch.push(2)).unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, vec![2]);

        queue.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_forces_final_flush_after_grace() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u32>>();
        let flush_calls = calls.clone();
        let flush: FlushAction<Vec<u32>> = Arc::new(move |batch| {
            let tx = tx.clone();
            let n = flush_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    // First flush hangs forever
                    futures::future::pending::<()>().await;
                }
                tx.send(batch)?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        let queue = WriteQueue::new(
            "test",
            WriteQueueConfig {
                idle_interval: Duration::from_secs(3600),
                stop_grace: Duration::from_millis(50),
            },
            flush,
        );
        queue.start();

        queue.enqueue(|batch| batch.push(1)).unwrap();
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        queue.enqueue(|batch| batch.push(2)).unwrap();

        tokio::time::timeout(Duration::from_secs(2), queue.stop())
            .await
            .expect("stop must be bounded by the grace period");

        assert_eq!(rx.recv().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_map_batch_deduplicates_keys() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BTreeMap<i64, &'static str>>();
        let flush: FlushAction<BTreeMap<i64, &'static str>> = Arc::new(move |batch| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(batch)?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        let queue = WriteQueue::new("test", slow_idle(), flush);

        queue.enqueue(|batch| { batch.insert(7, "a"); }).unwrap();
        queue.enqueue(|batch| { batch.insert(7, "b"); }).unwrap();
        assert_eq!(queue.pending_len(), 1);

        queue.stop().await;
        assert_eq!(rx.recv().await.unwrap(), BTreeMap::from([(7, "b")]));
    }
}
