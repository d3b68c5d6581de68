//! Background maintenance worker of one vector index.
//!
//! A single dedicated thread owns three workloads that all mutate the same
//! graph and therefore never run in parallel:
//!
//! - the indexing queue (eventual indexing), applied in FIFO order
//! - periodic optimization, debounced by a change counter
//! - periodic persistence, debounced by its own change counter
//!
//! The thread is an actor over a tagged message channel plus two tick
//! timers. Optimization and persistence always drain the indexing queue
//! inline before they run, so they never observe a half-applied queue.
//!
//! The worker reaches the index through the narrow [`GraphMutationSink`],
//! [`Optimizable`] and [`Persistable`] traits, held as `Weak` references so
//! the worker never keeps a dropped index alive. Errors from the callbacks
//! are logged and swallowed: a crashed worker would silently stop all future
//! maintenance.

use crate::config::VectorIndexConfig;
use crate::error::{Error, Result};
use crate::index::hnsw::NodeId;
use crate::store::VectorRef;
use crossbeam_channel::{
    bounded, never, select, tick, unbounded, Receiver, RecvTimeoutError, Sender,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Bounded wait for a graceful worker shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded wait for the worker to acknowledge a drain.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A deferred graph mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexingOp {
    /// Insert a new node.
    Add {
        /// Graph ordinal (= entity id).
        ordinal: NodeId,
        /// Vector to insert.
        vector: VectorRef,
    },
    /// Move an existing node.
    Update {
        /// Graph ordinal (= entity id).
        ordinal: NodeId,
        /// New vector.
        vector: VectorRef,
    },
    /// Tombstone a node.
    Remove {
        /// Graph ordinal (= entity id).
        ordinal: NodeId,
    },
}

/// An [`IndexingOp`] stamped with the index generation it was issued in.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOp {
    /// The mutation.
    pub op: IndexingOp,
    /// Index generation at enqueue time.
    pub generation: u64,
}

/// Applies queued graph mutations.
pub trait GraphMutationSink: Send + Sync {
    /// Applies `batch` in order.
    ///
    /// # Errors
    ///
    /// Any error is logged by the worker; the batch is not retried.
    fn apply_batch(&self, batch: Vec<QueuedOp>) -> Result<()>;
}

/// Runs graph cleanup on behalf of the worker.
pub trait Optimizable: Send + Sync {
    /// Optimizes the graph. The indexing queue is already drained.
    ///
    /// # Errors
    ///
    /// Any error is logged and the change counter is left untouched.
    fn optimize_in_background(&self) -> Result<()>;
}

/// Writes the index to disk on behalf of the worker.
pub trait Persistable: Send + Sync {
    /// Persists the graph. The indexing queue is already drained.
    ///
    /// # Errors
    ///
    /// Any error is logged and the change counter is left untouched.
    fn persist_in_background(&self) -> Result<()>;
}

/// Interval and debounce threshold of one periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    /// Tick interval.
    pub interval: Duration,
    /// Minimum number of changes before a tick runs the task.
    pub threshold: u64,
}

/// What the worker runs besides the indexing queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Periodic optimization.
    pub optimization: Option<MaintenanceSchedule>,
    /// Periodic persistence.
    pub persistence: Option<MaintenanceSchedule>,
    /// Graph mutations are queued instead of applied synchronously.
    pub eventual_indexing: bool,
}

impl BackgroundConfig {
    /// Derives the worker setup from an index configuration.
    ///
    /// Persistence is only scheduled for on-disk indices.
    #[must_use]
    pub fn from_index_config(config: &VectorIndexConfig) -> Self {
        Self {
            optimization: config
                .optimization_interval()
                .map(|interval| MaintenanceSchedule {
                    interval,
                    threshold: config.optimization_threshold,
                }),
            persistence: config
                .persistence_interval()
                .filter(|_| config.on_disk)
                .map(|interval| MaintenanceSchedule {
                    interval,
                    threshold: config.persistence_threshold,
                }),
            eventual_indexing: config.eventual_indexing,
        }
    }

    /// Returns true if a worker thread is needed at all.
    #[must_use]
    pub fn is_needed(&self) -> bool {
        self.eventual_indexing || self.optimization.is_some() || self.persistence.is_some()
    }
}

/// Debounced change counter of one periodic task.
#[derive(Debug)]
struct MaintenanceCounter {
    schedule: Option<MaintenanceSchedule>,
    changes: AtomicU64,
    runs: AtomicU64,
}

impl MaintenanceCounter {
    fn new(schedule: Option<MaintenanceSchedule>) -> Self {
        Self {
            schedule,
            changes: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        }
    }

    fn mark(&self, count: u64) {
        if self.schedule.is_some() {
            self.changes.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn pending(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    fn is_due(&self) -> bool {
        self.schedule
            .is_some_and(|s| self.pending() > 0 && self.pending() >= s.threshold)
    }

    /// Records a successful run that covered `observed` changes.
    fn complete(&self, observed: u64) {
        // Changes marked while the task ran stay pending.
        let _ = self
            .changes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(observed))
            });
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    fn ticker(&self) -> Receiver<Instant> {
        self.schedule.map_or_else(never, |s| tick(s.interval))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Maintenance {
    Optimize,
    Persist,
}

enum Message {
    ProcessBatch,
    Drain(Sender<()>),
    Shutdown {
        drain: bool,
        optimize: bool,
        persist: bool,
        ack: Sender<()>,
    },
}

/// State shared between the handle and the worker thread.
struct Shared {
    name: String,
    queue: Mutex<VecDeque<QueuedOp>>,
    /// Operations enqueued and not yet applied or discarded.
    pending: AtomicUsize,
    batch_scheduled: AtomicBool,
    optimization: MaintenanceCounter,
    persistence: MaintenanceCounter,
    sink: Weak<dyn GraphMutationSink>,
    optimizer: Weak<dyn Optimizable>,
    persister: Weak<dyn Persistable>,
}

impl Shared {
    /// Applies queued operations until the queue is empty.
    fn drain_inline(&self) {
        loop {
            let batch: Vec<QueuedOp> = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    return;
                }
                queue.drain(..).collect()
            };
            let len = batch.len();
            match self.sink.upgrade() {
                Some(sink) => {
                    tracing::debug!(index = %self.name, ops = len, "Applying indexing batch");
                    if let Err(e) = sink.apply_batch(batch) {
                        tracing::error!(index = %self.name, error = %e, "Indexing batch failed");
                    }
                }
                None => {
                    tracing::debug!(index = %self.name, ops = len, "Index dropped, discarding batch");
                }
            }
            self.pending.fetch_sub(len, Ordering::AcqRel);
        }
    }

    fn process_batch(&self) {
        loop {
            self.drain_inline();
            self.batch_scheduled.store(false, Ordering::SeqCst);
            // Work enqueued during the drain may have seen the flag still set.
            if self.queue.lock().is_empty() || self.batch_scheduled.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }

    fn discard(&self) -> usize {
        let discarded = {
            let mut queue = self.queue.lock();
            let len = queue.len();
            queue.clear();
            len
        };
        self.pending.fetch_sub(discarded, Ordering::AcqRel);
        discarded
    }

    fn counter(&self, kind: Maintenance) -> &MaintenanceCounter {
        match kind {
            Maintenance::Optimize => &self.optimization,
            Maintenance::Persist => &self.persistence,
        }
    }

    /// Drains the queue, then runs `kind` if its target is still alive.
    fn run_maintenance(&self, kind: Maintenance) {
        let counter = self.counter(kind);
        let observed = counter.pending();
        self.drain_inline();

        let result = match kind {
            Maintenance::Optimize => self.optimizer.upgrade().map(|t| t.optimize_in_background()),
            Maintenance::Persist => self.persister.upgrade().map(|t| t.persist_in_background()),
        };
        match result {
            Some(Ok(())) => {
                counter.complete(observed);
                tracing::debug!(index = %self.name, task = ?kind, changes = observed, "Maintenance completed");
            }
            Some(Err(e)) => {
                tracing::error!(index = %self.name, task = ?kind, error = %e, "Maintenance failed, will retry");
            }
            None => {}
        }
    }

    fn on_tick(&self, kind: Maintenance) {
        if self.counter(kind).is_due() {
            self.run_maintenance(kind);
        }
    }

    fn run(&self, rx: &Receiver<Message>) {
        let optimize_tick = self.optimization.ticker();
        let persist_tick = self.persistence.ticker();
        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(Message::ProcessBatch) => self.process_batch(),
                    Ok(Message::Drain(ack)) => {
                        self.drain_inline();
                        let _ = ack.send(());
                    }
                    Ok(Message::Shutdown { drain, optimize, persist, ack }) => {
                        self.finish(drain, optimize, persist);
                        let _ = ack.send(());
                        return;
                    }
                    Err(_) => return,
                },
                recv(optimize_tick) -> _ => self.on_tick(Maintenance::Optimize),
                recv(persist_tick) -> _ => self.on_tick(Maintenance::Persist),
            }
        }
    }

    fn finish(&self, drain: bool, optimize: bool, persist: bool) {
        if drain {
            self.drain_inline();
        } else {
            self.discard();
        }
        // Optimize first so a final persist writes the cleaned-up graph.
        if optimize && self.optimization.pending() > 0 {
            self.run_maintenance(Maintenance::Optimize);
        }
        if persist && self.persistence.pending() > 0 {
            self.run_maintenance(Maintenance::Persist);
        }
    }
}

/// Handle to the worker thread of one index.
pub struct BackgroundTaskManager {
    shared: Arc<Shared>,
    tx: Sender<Message>,
    worker_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: BackgroundConfig,
}

impl std::fmt::Debug for BackgroundTaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskManager")
            .field("name", &self.shared.name)
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl BackgroundTaskManager {
    /// Spawns the worker thread `vindex-bg-{name}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned.
    pub fn start(
        name: &str,
        config: BackgroundConfig,
        sink: Weak<dyn GraphMutationSink>,
        optimizer: Weak<dyn Optimizable>,
        persister: Weak<dyn Persistable>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            batch_scheduled: AtomicBool::new(false),
            optimization: MaintenanceCounter::new(config.optimization),
            persistence: MaintenanceCounter::new(config.persistence),
            sink,
            optimizer,
            persister,
        });
        let (tx, rx) = unbounded();

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("vindex-bg-{name}"))
            .spawn(move || worker.run(&rx))?;
        let worker_id = handle.thread().id();

        tracing::debug!(index = %name, ?config, "Background worker started");
        Ok(Self {
            shared,
            tx,
            worker_id,
            handle: Mutex::new(Some(handle)),
            config,
        })
    }

    /// The schedule this worker was started with.
    #[must_use]
    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Appends an operation and schedules a batch if none is scheduled.
    pub fn enqueue(&self, op: QueuedOp) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.lock().push_back(op);
        if !self.shared.batch_scheduled.swap(true, Ordering::SeqCst)
            && self.tx.send(Message::ProcessBatch).is_err()
        {
            self.shared.batch_scheduled.store(false, Ordering::SeqCst);
            tracing::warn!(index = %self.shared.name, "Worker stopped, operation stays queued");
        }
    }

    /// Blocks until every operation enqueued so far has been applied,
    /// waiting at most [`DRAIN_TIMEOUT`].
    ///
    /// Called on the worker thread itself, drains inline. If the worker has
    /// stopped, drains on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the worker exits before acknowledging or
    /// does not acknowledge in time.
    pub fn drain_queue(&self) -> Result<()> {
        self.drain_queue_timeout(DRAIN_TIMEOUT)
    }

    /// [`drain_queue`](Self::drain_queue) with an explicit bound.
    ///
    /// A timeout leaves the drain request queued on the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the worker exits before acknowledging or
    /// does not acknowledge within `timeout`.
    pub fn drain_queue_timeout(&self, timeout: Duration) -> Result<()> {
        if self.on_worker_thread() || !self.is_running() {
            self.shared.drain_inline();
            return Ok(());
        }
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Message::Drain(ack_tx)).is_err() {
            self.shared.drain_inline();
            return Ok(());
        }
        match ack_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    index = %self.shared.name,
                    timeout_ms = timeout.as_millis(),
                    pending = self.pending_count(),
                    "Drain not acknowledged in time"
                );
                Err(Error::Worker(format!(
                    "worker of '{}' did not drain within {timeout:?}",
                    self.shared.name
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Worker(format!(
                "worker of '{}' exited before the drain completed",
                self.shared.name
            ))),
        }
    }

    /// Drops every pending operation without applying it.
    pub fn discard_queue(&self) -> usize {
        let discarded = self.shared.discard();
        if discarded > 0 {
            tracing::debug!(index = %self.shared.name, discarded, "Discarded indexing queue");
        }
        discarded
    }

    /// Counts `count` changes towards both periodic tasks.
    pub fn mark_changed(&self, count: u64) {
        self.shared.optimization.mark(count);
        self.shared.persistence.mark(count);
    }

    /// Operations enqueued and not yet applied.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Completed background optimizations.
    #[must_use]
    pub fn optimize_count(&self) -> u64 {
        self.shared.optimization.runs.load(Ordering::Relaxed)
    }

    /// Completed background persists.
    #[must_use]
    pub fn persist_count(&self) -> u64 {
        self.shared.persistence.runs.load(Ordering::Relaxed)
    }

    /// Stops the timers, optionally drains and runs pending maintenance on
    /// the worker, then joins it with a bounded wait. Idempotent.
    ///
    /// On timeout the worker is detached and a warning logged.
    pub fn shutdown(&self, drain: bool, optimize_pending: bool, persist_pending: bool) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let (ack_tx, ack_rx) = bounded(1);
        let sent = self.tx.send(Message::Shutdown {
            drain,
            optimize: optimize_pending,
            persist: persist_pending,
            ack: ack_tx,
        });
        if sent.is_err() || self.on_worker_thread() {
            return;
        }

        match ack_rx.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(()) => {
                if handle.join().is_err() {
                    tracing::warn!(index = %self.shared.name, "Background worker panicked");
                }
                tracing::debug!(index = %self.shared.name, "Background worker stopped");
            }
            Err(_) => {
                tracing::warn!(
                    index = %self.shared.name,
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Background worker did not stop in time, detaching"
                );
            }
        }
    }

    /// Discards the queue and signals the worker to stop without waiting.
    ///
    /// Used when the caller may hold the store lock the worker is blocked on.
    pub fn shutdown_now(&self) {
        self.discard_queue();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let (ack_tx, _) = bounded(1);
        let _ = self.tx.send(Message::Shutdown {
            drain: false,
            optimize: false,
            persist: false,
            ack: ack_tx,
        });
        drop(handle);
    }
}

impl Drop for BackgroundTaskManager {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
