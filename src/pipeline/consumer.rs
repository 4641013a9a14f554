use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::constants::*;
use crate::core::tree::Tree;
use crate::core::txn::Txn;
use crate::error::{Error, ErrorCode, Result};
use crate::pipeline::queue::{SwappedBuffer, WriteQueue};

/// What to do with an item whose write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Abort the batch and stop the consumer.
    FailFast,
    /// Retry with exponential backoff, then dead-letter.
    Retry,
    /// Dead-letter immediately.
    DeadLetter,
    /// Release the item and move on. The write is lost.
    LogContinue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra sink for consumer log lines, called after the `tracing` event.
pub type LogFn = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Configuration for the batching consumer.
#[derive(Clone)]
pub struct ConsumerConfig {
    pub error_strategy: ErrorStrategy,
    /// Attempts after the first failure, for [`ErrorStrategy::Retry`]
    pub max_retries: u32,
    /// Backoff base; attempt `n` sleeps `retry_backoff << n`
    pub retry_backoff: Duration,
    /// Items per transaction (0 = the whole swapped buffer)
    pub max_batch_size: usize,
    /// A transaction open longer than this is committed early
    pub commit_interval: Duration,
    /// Keep recent batch latencies for the P95
    pub enable_latency_tracking: bool,
    /// Minimum time between throughput/queue metric refreshes
    pub metrics_update_interval: Duration,
    pub log_fn: Option<LogFn>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            error_strategy: ErrorStrategy::Retry,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_batch_size: 0,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            enable_latency_tracking: true,
            metrics_update_interval: DEFAULT_METRICS_INTERVAL,
            log_fn: None,
        }
    }
}

impl ConsumerConfig {
    pub fn with_log_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        self.log_fn = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("error_strategy", &self.error_strategy)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("max_batch_size", &self.max_batch_size)
            .field("commit_interval", &self.commit_interval)
            .field("enable_latency_tracking", &self.enable_latency_tracking)
            .field("metrics_update_interval", &self.metrics_update_interval)
            .field("log_fn", &self.log_fn.is_some())
            .finish()
    }
}

/// Lifecycle of the consumer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ConsumerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConsumerState::Created,
            1 => ConsumerState::Running,
            2 => ConsumerState::Stopping,
            _ => ConsumerState::Stopped,
        }
    }
}

/// Point-in-time consumer metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerMetrics {
    // Throughput
    pub total_items_processed: u64,
    pub total_batches_processed: u64,
    pub items_per_second: u64,

    // Batch latency (milliseconds)
    pub avg_batch_latency_ms: u64,
    pub max_batch_latency_ms: u64,
    pub p95_batch_latency_ms: u64,

    // Queue
    pub current_queue_depth: u64,
    pub queue_utilization: f64,

    // Errors
    pub total_errors: u64,
    pub consecutive_errors: u64,
    pub items_in_dlq: u64,
    pub items_discarded: u64,

    pub is_running: bool,
    pub is_healthy: bool,
    pub uptime_seconds: u64,
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self {
            total_items_processed: 0,
            total_batches_processed: 0,
            items_per_second: 0,
            avg_batch_latency_ms: 0,
            max_batch_latency_ms: 0,
            p95_batch_latency_ms: 0,
            current_queue_depth: 0,
            queue_utilization: 0.0,
            total_errors: 0,
            consecutive_errors: 0,
            items_in_dlq: 0,
            items_discarded: 0,
            is_running: false,
            is_healthy: true,
            uptime_seconds: 0,
        }
    }
}

/// An item the consumer could not write.
#[derive(Debug, Clone)]
pub struct DeadLetter<K, V> {
    pub key: K,
    pub value: V,
    /// Write attempts made before giving up
    pub attempts: u32,
    pub failed_at: SystemTime,
    pub error: Error,
}

struct MetricsState {
    snapshot: ConsumerMetrics,
    latencies: VecDeque<u64>,
    total_latency_ms: u64,
    started: Instant,
    last_update: Instant,
    items_at_last_update: u64,
}

impl MetricsState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            snapshot: ConsumerMetrics::default(),
            latencies: VecDeque::with_capacity(LATENCY_SAMPLES),
            total_latency_ms: 0,
            started: now,
            last_update: now,
            items_at_last_update: 0,
        }
    }

    fn p95(&self) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (sorted.len() as f64 * 0.95) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

enum ItemOutcome<K, V> {
    /// Written into the open transaction; released after commit.
    Written(K, V),
    /// Dead-lettered or discarded.
    Handled,
    /// FAIL_FAST tripped; the batch must be abandoned.
    Fatal(K, V, Error),
}

struct Shared<K, V> {
    queue: Arc<WriteQueue<K, V>>,
    tree: Arc<Tree>,
    config: ConsumerConfig,
    running: AtomicBool,
    should_stop: AtomicBool,
    state: AtomicU8,
    metrics: Mutex<MetricsState>,
    dlq: Mutex<Vec<DeadLetter<K, V>>>,
    total_errors: AtomicU64,
    consecutive_errors: AtomicU64,
    items_discarded: AtomicU64,
}

/// Worker that moves items from a [`WriteQueue`] into a [`Tree`].
///
/// Each wake-up swaps out the whole queue buffer and writes it with
/// [`Tree::upsert_txn`] inside one write transaction (or several, when
/// `max_batch_size` or `commit_interval` split it). Items are released back
/// through the queue callbacks only after their transaction commits. Failed
/// items are routed by [`ErrorStrategy`].
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use bytes::Bytes;
/// # use wtree::{Db, Tree, TreeFlags};
/// # use wtree::pipeline::{Consumer, ConsumerConfig, QueueCallbacks, WriteQueue};
/// # fn main() -> wtree::Result<()> {
/// let db = Db::builder().open("/var/lib/app")?;
/// let tree = Arc::new(Tree::open(&db, "events", TreeFlags::default(), 0)?);
/// let queue: Arc<WriteQueue> = Arc::new(WriteQueue::new(1024, QueueCallbacks::new())?);
///
/// let mut consumer = Consumer::new(queue.clone(), tree, ConsumerConfig::default());
/// consumer.start()?;
/// queue.enqueue(Bytes::from_static(b"k"), Bytes::from_static(b"v")).ok();
/// queue.drain();
/// consumer.stop();
/// # Ok(())
/// # }
/// ```
pub struct Consumer<K = Bytes, V = Bytes>
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    shared: Arc<Shared<K, V>>,
    handle: Option<JoinHandle<()>>,
}

impl<K, V> Consumer<K, V>
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    /// Create a consumer for `queue` writing into `tree`. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(queue: Arc<WriteQueue<K, V>>, tree: Arc<Tree>, config: ConsumerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                tree,
                config,
                running: AtomicBool::new(false),
                should_stop: AtomicBool::new(false),
                state: AtomicU8::new(ConsumerState::Created as u8),
                metrics: Mutex::new(MetricsState::new()),
                dlq: Mutex::new(Vec::new()),
                total_errors: AtomicU64::new(0),
                consecutive_errors: AtomicU64::new(0),
                items_discarded: AtomicU64::new(0),
            }),
            handle: None,
        }
    }

    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// * `InvalidArg` - The consumer was already started
    /// * `Generic` - The thread could not be spawned
    pub fn start(&mut self) -> Result<()> {
        let shared = &self.shared;
        if shared
            .state
            .compare_exchange(
                ConsumerState::Created as u8,
                ConsumerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::with_label(
                CONSUMER_LABEL,
                ErrorCode::InvalidArg,
                "Consumer already started",
            ));
        }

        shared.running.store(true, Ordering::Release);
        shared.metrics.lock().started = Instant::now();

        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("wtree-consumer".to_string())
            .spawn(move || run_consumer(worker));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                shared.set_state(ConsumerState::Stopped);
                Err(Error::from(e).relabel(CONSUMER_LABEL))
            }
        }
    }

    /// Flush the queue, let the worker write what is left and join it.
    ///
    /// The queue refuses new items from here on.
    pub fn stop(&mut self) {
        let shared = &self.shared;
        shared.log(LogLevel::Info, "Stopping consumer...");
        shared.should_stop.store(true, Ordering::Release);
        let _ = shared.state.compare_exchange(
            ConsumerState::Running as u8,
            ConsumerState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        shared.queue.flush();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                shared.log(LogLevel::Error, "Consumer thread panicked");
                shared.running.store(false, Ordering::Release);
            }
        }
        shared.set_state(ConsumerState::Stopped);
        shared.log(LogLevel::Info, "Consumer stopped gracefully");
    }

    /// Stop if running, then release every dead-lettered item.
    pub fn destroy(self) {}

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Running with fewer than ten consecutive write errors.
    pub fn is_healthy(&self) -> bool {
        self.is_running()
            && self.shared.consecutive_errors.load(Ordering::Acquire) < UNHEALTHY_ERROR_STREAK
    }

    /// Snapshot of the metrics.
    ///
    /// Error counters, DLQ size and run state are current; throughput and
    /// queue figures are as of the last periodic refresh.
    pub fn metrics(&self) -> ConsumerMetrics {
        let shared = &self.shared;
        let mut metrics = shared.metrics.lock().snapshot.clone();
        shared.fill_live(&mut metrics);
        metrics
    }

    pub fn dlq_len(&self) -> usize {
        self.shared.dlq.lock().len()
    }

    /// Copies of the dead-lettered `(key, value)` pairs, oldest first.
    pub fn get_dlq(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shared
            .dlq
            .lock()
            .iter()
            .map(|item| (item.key.clone(), item.value.clone()))
            .collect()
    }

    /// Remove and return every dead-lettered item for reprocessing.
    pub fn take_dlq(&self) -> Vec<DeadLetter<K, V>> {
        std::mem::take(&mut *self.shared.dlq.lock())
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.shared.config
    }
}

impl<K, V> Drop for Consumer<K, V>
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
        for item in self.take_dlq() {
            self.shared.queue.release(item.key, item.value);
        }
    }
}

impl<K, V> fmt::Debug for Consumer<K, V>
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("tree", &self.shared.tree.name())
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish()
    }
}

fn run_consumer<K, V>(shared: Arc<Shared<K, V>>)
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    shared.log(LogLevel::Info, "Consumer thread started");

    loop {
        // Items queued before a flush are still written.
        if !shared.queue.wait_nonempty() {
            if shared.should_stop.load(Ordering::Acquire) {
                shared.log(LogLevel::Info, "Queue flushed, consumer exiting");
            }
            break;
        }

        let buffer = shared.queue.swap_buffer(0);
        if buffer.is_empty() {
            continue;
        }

        if !shared.process_buffer(buffer) {
            shared.log(LogLevel::Fatal, "Consumer stopping due to fatal error");
            break;
        }
        shared.update_metrics(false);
    }

    shared.running.store(false, Ordering::Release);
    shared.set_state(ConsumerState::Stopped);
    shared.update_metrics(true);
    shared.log(LogLevel::Info, "Consumer thread stopped");
}

impl<K, V> Shared<K, V>
where
    K: AsRef<[u8]> + Send + 'static,
    V: AsRef<[u8]> + Send + 'static,
{
    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn log(&self, level: LogLevel, message: &str) {
        let tree = self.tree.name();
        match level {
            LogLevel::Debug => tracing::debug!(tree, "{}", message),
            LogLevel::Info => tracing::info!(tree, "{}", message),
            LogLevel::Warn => tracing::warn!(tree, "{}", message),
            LogLevel::Error => tracing::error!(tree, "{}", message),
            LogLevel::Fatal => tracing::error!(tree, fatal = true, "{}", message),
        }
        if let Some(log_fn) = &self.config.log_fn {
            log_fn(level, message);
        }
    }

    /// Write a swapped buffer. Returns `false` when the consumer must stop;
    /// unwritten items have been dead-lettered by then.
    fn process_buffer(&self, mut buffer: SwappedBuffer<K, V>) -> bool {
        let limit = match self.config.max_batch_size {
            0 => usize::MAX,
            n => n,
        };

        while !buffer.is_empty() {
            let txn = match self.tree.db().begin_write() {
                Ok(txn) => txn,
                Err(e) => {
                    self.log(
                        LogLevel::Error,
                        &format!("Failed to begin transaction: {}", e),
                    );
                    self.park_all(Vec::new(), buffer, &e);
                    return false;
                }
            };

            let opened = Instant::now();
            let mut written: Vec<(K, V)> = Vec::new();
            let mut attempted = 0usize;

            while attempted < limit && (attempted == 0 || !self.interval_elapsed(opened)) {
                let Some((key, value)) = buffer.next() else {
                    break;
                };
                attempted += 1;

                match self.write_item(&txn, key, value) {
                    ItemOutcome::Written(key, value) => written.push((key, value)),
                    ItemOutcome::Handled => {}
                    ItemOutcome::Fatal(key, value, e) => {
                        txn.abort();
                        written.push((key, value));
                        self.park_all(written, buffer, &e);
                        return false;
                    }
                }
            }

            if let Err(e) = txn.commit() {
                self.log(
                    LogLevel::Error,
                    &format!("Failed to commit transaction: {}", e),
                );
                self.park_all(written, buffer, &e);
                return false;
            }

            self.finish_batch(written, opened.elapsed());
        }
        true
    }

    fn interval_elapsed(&self, opened: Instant) -> bool {
        !self.config.commit_interval.is_zero() && opened.elapsed() >= self.config.commit_interval
    }

    fn write_item(&self, txn: &Txn, key: K, value: V) -> ItemOutcome<K, V> {
        let config = &self.config;
        let mut attempt = 0u32;

        loop {
            let err = match self.tree.upsert_txn(txn, key.as_ref(), value.as_ref()) {
                Ok(()) => {
                    self.consecutive_errors.store(0, Ordering::Release);
                    return ItemOutcome::Written(key, value);
                }
                Err(e) => e,
            };

            self.total_errors.fetch_add(1, Ordering::AcqRel);
            self.consecutive_errors.fetch_add(1, Ordering::AcqRel);
            self.log(
                LogLevel::Error,
                &format!(
                    "Write failed: {} (retry {}/{})",
                    err, attempt, config.max_retries
                ),
            );

            match config.error_strategy {
                ErrorStrategy::FailFast => {
                    self.log(
                        LogLevel::Fatal,
                        "Consumer stopping due to error (FAIL_FAST)",
                    );
                    return ItemOutcome::Fatal(key, value, err);
                }
                ErrorStrategy::Retry if attempt < config.max_retries => {
                    let backoff = config.retry_backoff * (1u32 << attempt.min(MAX_BACKOFF_SHIFT));
                    self.log(
                        LogLevel::Warn,
                        &format!("Retrying after {}ms backoff", backoff.as_millis()),
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                ErrorStrategy::Retry => {
                    self.log(
                        LogLevel::Error,
                        "Max retries exceeded, moving to dead letter queue",
                    );
                    self.dead_letter(key, value, attempt + 1, err);
                    return ItemOutcome::Handled;
                }
                ErrorStrategy::DeadLetter => {
                    self.dead_letter(key, value, attempt + 1, err);
                    self.log(LogLevel::Warn, "Item moved to dead letter queue");
                    return ItemOutcome::Handled;
                }
                ErrorStrategy::LogContinue => {
                    self.log(LogLevel::Warn, "Skipping failed item (data loss)");
                    self.items_discarded.fetch_add(1, Ordering::AcqRel);
                    self.queue.release(key, value);
                    return ItemOutcome::Handled;
                }
            }
        }
    }

    fn dead_letter(&self, key: K, value: V, attempts: u32, error: Error) {
        self.dlq.lock().push(DeadLetter {
            key,
            value,
            attempts,
            failed_at: SystemTime::now(),
            error,
        });
    }

    /// Dead-letter everything of a batch that did not reach a commit.
    fn park_all(&self, written: Vec<(K, V)>, rest: SwappedBuffer<K, V>, error: &Error) {
        let now = SystemTime::now();
        let mut dlq = self.dlq.lock();
        let before = dlq.len();
        for (key, value) in written.into_iter().chain(rest) {
            dlq.push(DeadLetter {
                key,
                value,
                attempts: 0,
                failed_at: now,
                error: error.clone(),
            });
        }
        let parked = dlq.len() - before;
        drop(dlq);

        if parked > 0 {
            self.log(
                LogLevel::Warn,
                &format!("{} uncommitted items moved to dead letter queue", parked),
            );
        }
    }

    fn finish_batch(&self, written: Vec<(K, V)>, latency: Duration) {
        let processed = written.len() as u64;
        for (key, value) in written {
            self.queue.release(key, value);
        }
        self.queue.notify_batch_flush();

        let latency_ms = latency.as_millis() as u64;
        {
            let mut state = self.metrics.lock();
            state.total_latency_ms += latency_ms;
            let total_latency_ms = state.total_latency_ms;
            let m = &mut state.snapshot;
            m.total_items_processed += processed;
            m.total_batches_processed += 1;
            m.max_batch_latency_ms = m.max_batch_latency_ms.max(latency_ms);
            m.avg_batch_latency_ms = total_latency_ms / m.total_batches_processed;

            if self.config.enable_latency_tracking {
                if state.latencies.len() == LATENCY_SAMPLES {
                    state.latencies.pop_front();
                }
                state.latencies.push_back(latency_ms);
            }
        }

        self.log(
            LogLevel::Info,
            &format!("Batch processed: {} items in {}ms", processed, latency_ms),
        );
    }

    fn update_metrics(&self, force: bool) {
        let mut state = self.metrics.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update);
        if !force && elapsed < self.config.metrics_update_interval {
            return;
        }

        let processed = state.snapshot.total_items_processed;
        if elapsed.as_secs_f64() > 0.0 {
            let delta = processed - state.items_at_last_update;
            state.snapshot.items_per_second = (delta as f64 / elapsed.as_secs_f64()) as u64;
        }
        state.items_at_last_update = processed;

        let depth = self.queue.depth();
        let capacity = self.queue.capacity();
        state.snapshot.current_queue_depth = depth;
        state.snapshot.queue_utilization = depth as f64 / capacity as f64;
        state.snapshot.uptime_seconds = now.duration_since(state.started).as_secs();
        if self.config.enable_latency_tracking {
            state.snapshot.p95_batch_latency_ms = state.p95();
        }
        state.last_update = now;
        self.fill_live(&mut state.snapshot);
    }

    fn fill_live(&self, metrics: &mut ConsumerMetrics) {
        metrics.total_errors = self.total_errors.load(Ordering::Acquire);
        metrics.consecutive_errors = self.consecutive_errors.load(Ordering::Acquire);
        metrics.items_discarded = self.items_discarded.load(Ordering::Acquire);
        metrics.items_in_dlq = self.dlq.lock().len() as u64;
        metrics.is_running = self.running.load(Ordering::Acquire);
        metrics.is_healthy = metrics.consecutive_errors < UNHEALTHY_ERROR_STREAK;
    }
}
