//! Bounded queue drained by one dedicated background worker.
//!
//! Producers call [`BoundedWorker::try_enqueue`], which never blocks: when the
//! queue is full the newest item is dropped and counted. The worker runs on
//! its own thread with a single-threaded Tokio runtime, polling the queue with
//! a short timeout so it notices shutdown promptly. Shutdown stops accepting,
//! drains what is queued within a bounded time, closes the handler and joins
//! the thread.

use crate::error::{LogweaveError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumes items taken off the queue.
#[async_trait]
pub trait QueueHandler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> Result<()>;

    /// Called once after the final drain.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// Queue full; the item was dropped
    Full,
    /// Worker shut down; the item was dropped
    Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub capacity: usize,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub struct BoundedWorker<T: Send + 'static> {
    name: String,
    sender: RwLock<Option<mpsc::Sender<T>>>,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    config: WorkerConfig,
}

impl<T: Send + 'static> BoundedWorker<T> {
    /// Spawn the worker thread.
    pub fn start<H: QueueHandler<T>>(
        name: impl Into<String>,
        config: WorkerConfig,
        handler: H,
    ) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let loop_stop = stop_flag.clone();
        let loop_counters = counters.clone();
        let loop_config = config.clone();
        let thread_name = format!("logweave-{}", name);
        let handle = std::thread::Builder::new().name(thread_name).spawn(move || {
            runtime.block_on(Self::worker_loop(receiver, handler, loop_stop, loop_counters, loop_config));
        })?;

        debug!("Started queue worker {}", name);
        Ok(Self {
            name,
            sender: RwLock::new(Some(sender)),
            stop_flag,
            counters,
            task_handle: Mutex::new(Some(handle)),
            config,
        })
    }

    /// Enqueue without blocking.
    pub fn try_enqueue(&self, item: T) -> Enqueue {
        let guard = self.sender.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Enqueue::Closed;
        };

        match sender.try_send(item) {
            Ok(()) => Enqueue::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Closed
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        let guard = self.task_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop accepting, drain within the configured timeout and join the
    /// worker. Safe to call more than once; later calls return `Ok`.
    ///
    /// Returns [`LogweaveError::Timeout`] when the worker thread is still
    /// running after the drain and close deadlines; it is then left detached.
    pub fn shutdown(&self) -> Result<()> {
        let handle = {
            let mut guard = self.task_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        debug!("Stopping queue worker {}", self.name);
        self.sender.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        self.stop_flag.store(true, Ordering::SeqCst);

        // The worker bounds its own drain and close; allow for one poll cycle
        // on either side of that.
        let deadline = Instant::now() + self.config.drain_timeout * 2 + self.config.poll_interval * 2;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Queue worker {} panicked", self.name);
            }
            info!(
                "Queue worker {} stopped (delivered: {}, failed: {}, dropped: {})",
                self.name,
                self.delivered(),
                self.failed(),
                self.dropped()
            );
            Ok(())
        } else {
            warn!("Queue worker {} did not stop within its drain timeout", self.name);
            Err(LogweaveError::Timeout(format!("queue worker {} did not stop", self.name)))
        }
    }

    async fn worker_loop<H: QueueHandler<T>>(
        mut receiver: mpsc::Receiver<T>,
        handler: H,
        stop_flag: Arc<AtomicBool>,
        counters: Arc<Counters>,
        config: WorkerConfig,
    ) {
        while !stop_flag.load(Ordering::SeqCst) {
            match tokio::time::timeout(config.poll_interval, receiver.recv()).await {
                Ok(Some(item)) => Self::deliver(&handler, &counters, item).await,
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        let drain = async {
            while let Ok(item) = receiver.try_recv() {
                Self::deliver(&handler, &counters, item).await;
            }
        };
        if tokio::time::timeout(config.drain_timeout, drain).await.is_err() {
            warn!("Drain timed out; discarding the rest of the queue");
        }

        receiver.close();
        while receiver.try_recv().is_ok() {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }

        match tokio::time::timeout(config.drain_timeout, handler.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Queue handler close failed: {}", e),
            Err(_) => warn!("Queue handler close timed out"),
        }
        debug!("Queue worker loop exiting");
    }

    async fn deliver<H: QueueHandler<T>>(handler: &H, counters: &Counters, item: T) {
        match handler.handle(item).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Queue handler failed, item dropped: {}", e);
            }
        }
    }
}

impl<T: Send + 'static> Drop for BoundedWorker<T> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}
