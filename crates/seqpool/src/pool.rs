//! The pool: worker threads and the multi-queue scheduler
//!
//! One mutex guards the pool counters, the idle-worker stack and every
//! queue's buffers, so cross-queue coordination needs no lock ordering.
//! Workers scan the ring of attached queues round-robin from its head,
//! rotate the head past the queue they picked from, and run the work
//! function with the mutex released.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use seqpool_core::error::{PoolError, PoolResult};
use seqpool_core::id::QueueId;
use seqpool_core::{pool_fault, pool_trace};

use crate::config::{PoolConfig, QueueConfig};
use crate::queue::{Job, OutSlot, Payload, QueueSignals, QueueState, SeqQueue, WorkFn};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn os_thread_id() -> u64 {
            unsafe { libc::pthread_self() as u64 }
        }
    } else {
        fn os_thread_id() -> u64 {
            0
        }
    }
}

/// How a pool tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for every attached queue to quiesce, then stop the workers
    Drain,
    /// Stop the workers now; in-flight jobs still run to completion
    Kill,
}

/// Per-worker slot: the dedicated condition used for targeted wakeup
///
/// Dispatch wakes exactly one worker, which avoids a thundering herd and
/// makes the LIFO wake order deterministic.
pub(crate) struct WorkerSlot {
    pub(crate) pending: Condvar,
}

/// State shared between the pool handle, its workers and all queue handles
pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) workers: Vec<WorkerSlot>,
    next_queue_id: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
}

/// Everything the single pool mutex guards
pub(crate) struct PoolState {
    /// Every live queue, attached or not, addressed by id
    pub(crate) queues: HashMap<QueueId, QueueState>,
    /// Attached queues in scheduling order; the front is the scan head
    pub(crate) ring: VecDeque<QueueId>,
    /// Jobs queued on attached queues, not yet taken
    pub(crate) njobs: usize,
    /// Workers currently blocked waiting for work
    pub(crate) nwaiting: usize,
    /// Global shutdown flag
    pub(crate) shutdown: bool,
    /// LIFO stack of idle worker indexes, most recently slept on top
    pub(crate) idle: Vec<usize>,
    /// Lazily created fire-and-forget queue backing `Pool::execute`
    fire_queue: Option<QueueId>,
}

impl PoolState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            ring: VecDeque::new(),
            njobs: 0,
            nwaiting: 0,
            shutdown: false,
            idle: Vec::new(),
            fire_queue: None,
        }
    }

    /// Round-robin scan from the ring head for a runnable queue
    ///
    /// A queue is runnable when it has queued input and either collects
    /// no results or still has room on the output side. Producing into a
    /// full output would overflow a consumer-starved queue, so such
    /// queues are skipped and the backpressure moves upstream. On a hit
    /// the head job is unlinked and the ring rotated so the successor of
    /// the chosen queue becomes the new head.
    pub(crate) fn take_job(&mut self) -> Option<(QueueId, Job)> {
        for i in 0..self.ring.len() {
            let qid = self.ring[i];
            let q = match self.queues.get_mut(&qid) {
                Some(q) => q,
                None => continue,
            };
            if q.shutdown || q.input.is_empty() {
                continue;
            }
            if !q.in_only && q.output.len() >= q.qsize {
                continue;
            }
            let job = match q.input.pop_front() {
                Some(job) => job,
                None => continue,
            };
            q.n_processing += 1;
            if q.input.is_empty() {
                q.signals.input_empty.notify_all();
            }
            self.njobs -= 1;
            self.ring.rotate_left(i + 1);
            return Some((qid, job));
        }
        None
    }

    /// Shut a queue down: refuse new work, discard queued input, wake
    /// all waiters
    ///
    /// In-flight jobs finish and their results stay consumable. The
    /// discarded serials form a contiguous suffix above everything
    /// taken, so the released result stream stays gap-free.
    pub(crate) fn shutdown_queue(&mut self, qid: QueueId) {
        let dropped = match self.queues.get_mut(&qid) {
            Some(q) => {
                if q.shutdown {
                    return;
                }
                q.shutdown = true;
                let dropped = q.input.len();
                q.input.clear();
                if !q.attached {
                    // Detached input was not counted in njobs.
                    0
                } else {
                    dropped
                }
            }
            None => return,
        };
        self.njobs -= dropped;
        let q = match self.queues.get(&qid) {
            Some(q) => q,
            None => return,
        };
        q.signals.broadcast_all();
        pool_trace!(None, "{} shut down ({} queued jobs dropped)", qid, dropped);
    }

    /// Structural invariants, verified in debug builds
    #[cfg(debug_assertions)]
    pub(crate) fn check_invariants(&self) {
        let mut njobs = 0;
        for (qid, q) in self.queues.iter() {
            debug_assert!(q.input.len() <= q.qsize, "{}: input over qsize", qid);
            if !q.in_only {
                debug_assert!(q.output.len() <= q.qsize, "{}: output over qsize", qid);
            }
            debug_assert!(
                q.curr_serial <= q.next_serial,
                "{}: serial window inverted",
                qid
            );
            debug_assert!(q.size() <= 2 * q.qsize, "{}: combined budget exceeded", qid);
            let mut prev = None;
            for slot in q.output.iter() {
                debug_assert!(
                    q.curr_serial <= slot.serial && slot.serial < q.next_serial,
                    "{}: buffered serial {} outside window",
                    qid,
                    slot.serial
                );
                if let Some(p) = prev {
                    debug_assert!(p < slot.serial, "{}: output not sorted", qid);
                }
                prev = Some(slot.serial);
            }
            if q.attached {
                njobs += q.input.len();
            }
        }
        debug_assert_eq!(njobs, self.njobs, "njobs out of sync");
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn check_invariants(&self) {}
}

impl PoolShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn notify_worker(&self, idx: usize) {
        self.workers[idx].pending.notify_one();
    }

    /// Place a job on a queue's input side (both dispatch forms)
    pub(crate) fn dispatch_erased(
        &self,
        qid: QueueId,
        run: WorkFn,
        block: bool,
    ) -> PoolResult<()> {
        let mut st = self.lock_state();
        loop {
            if st.shutdown {
                return Err(PoolError::Closed);
            }
            let q = match st.queues.get_mut(&qid) {
                Some(q) => q,
                None => return Err(PoolError::Closed),
            };
            if q.shutdown {
                return Err(PoolError::Closed);
            }
            if !q.attached {
                return Err(PoolError::Detached);
            }
            if !q.budget_full() {
                let serial = q.next_serial.take();
                q.input.push_back(Job { serial, run });
                st.njobs += 1;
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                // Wake the most recently slept worker for cache warmth.
                if let Some(widx) = st.idle.pop() {
                    self.notify_worker(widx);
                }
                st.check_invariants();
                return Ok(());
            }
            if !block {
                return Err(PoolError::WouldBlock);
            }
            let signals = Arc::clone(&q.signals);
            st = signals.input_not_full.wait(st).unwrap();
        }
    }
}

/// A fixed set of worker threads serving any number of attached queues
///
/// Queues are created from the pool, attached while in service and owned
/// by their handles; the pool owns only the workers and the scheduler.
/// Dropping the pool kills it; prefer an explicit
/// [`shutdown`](Pool::shutdown) to pick drain vs. kill.
pub struct Pool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Create a pool with `workers` worker threads
    pub fn new(workers: usize) -> PoolResult<Pool> {
        Pool::with_config(PoolConfig::default().workers(workers))
    }

    /// Create a pool from a full configuration
    ///
    /// On partial thread-creation failure every already-spawned worker
    /// is stopped and joined before the error is returned.
    pub fn with_config(config: PoolConfig) -> PoolResult<Pool> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::new()),
            workers: (0..config.workers)
                .map(|_| WorkerSlot {
                    pending: Condvar::new(),
                })
                .collect(),
            next_queue_id: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, i))
                .spawn(move || worker_loop(worker_shared, i));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    {
                        let mut st = shared.lock_state();
                        st.shutdown = true;
                    }
                    for w in shared.workers.iter() {
                        w.pending.notify_all();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::from(e));
                }
            }
        }

        pool_trace!(None, "pool started with {} workers", config.workers);
        Ok(Pool { shared, handles })
    }

    /// Create a detached queue collecting results of type `T`
    pub fn queue<T>(&self, qsize: usize) -> PoolResult<SeqQueue<T>> {
        self.queue_with(QueueConfig::default().qsize(qsize))
    }

    /// Create a detached queue from a full configuration
    pub fn queue_with<T>(&self, config: QueueConfig) -> PoolResult<SeqQueue<T>> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let id = QueueId::new(self.shared.next_queue_id.fetch_add(1, Ordering::Relaxed));
        let signals = Arc::new(QueueSignals::new());
        {
            let mut st = self.shared.lock_state();
            if st.shutdown {
                return Err(PoolError::Closed);
            }
            st.queues
                .insert(id, QueueState::new(&config, Arc::clone(&signals)));
        }
        pool_trace!(
            None,
            "{} created (qsize {}, in_only {})",
            id,
            config.qsize,
            config.in_only
        );
        Ok(SeqQueue::new(
            Arc::clone(&self.shared),
            id,
            signals,
            config.qsize,
        ))
    }

    /// Fire-and-forget: run `f` on the pool, discarding its outcome
    ///
    /// Backed by a lazily created internal in_only queue sized at twice
    /// the worker count, so heavy callers still see backpressure.
    pub fn execute<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let qid = self.fire_queue()?;
        self.shared.dispatch_erased(
            qid,
            Box::new(move || {
                f();
                Box::new(()) as Payload
            }),
            true,
        )
    }

    fn fire_queue(&self) -> PoolResult<QueueId> {
        let mut st = self.shared.lock_state();
        if st.shutdown {
            return Err(PoolError::Closed);
        }
        if let Some(qid) = st.fire_queue {
            return Ok(qid);
        }
        let config = QueueConfig::default()
            .qsize(2 * self.shared.workers.len())
            .in_only(true);
        let qid = QueueId::new(self.shared.next_queue_id.fetch_add(1, Ordering::Relaxed));
        let mut q = QueueState::new(&config, Arc::new(QueueSignals::new()));
        q.attached = true;
        st.queues.insert(qid, q);
        st.ring.push_back(qid);
        st.fire_queue = Some(qid);
        pool_trace!(None, "fire-and-forget {} created", qid);
        Ok(qid)
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Jobs queued on attached queues, not yet taken by a worker
    pub fn pending_jobs(&self) -> usize {
        self.shared.lock_state().njobs
    }

    /// Workers currently blocked waiting for work
    pub fn waiting_workers(&self) -> usize {
        self.shared.lock_state().nwaiting
    }

    /// Total jobs accepted by dispatch since pool creation
    pub fn jobs_dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Total jobs whose work function has run since pool creation
    pub fn jobs_completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Tear the pool down and join every worker
    ///
    /// Drain first waits until every attached queue has nothing queued
    /// or executing; kill stops the workers at their next scheduling
    /// point and unblocks all waiters with `Closed`. Either way buffered
    /// results stay consumable from the queue handles afterwards, and
    /// the handles are destroyed independently by their owners.
    pub fn shutdown(mut self, mode: ShutdownMode) {
        self.shutdown_inner(mode);
    }

    fn shutdown_inner(&mut self, mode: ShutdownMode) {
        if self.handles.is_empty() {
            return;
        }
        pool_trace!(None, "pool shutdown ({:?})", mode);
        {
            let mut st = self.shared.lock_state();
            if mode == ShutdownMode::Drain {
                // Quiesce every attached queue before stopping workers.
                loop {
                    let busy = st.ring.iter().copied().find(|qid| {
                        st.queues
                            .get(qid)
                            .map_or(false, |q| !q.input.is_empty() || q.n_processing > 0)
                    });
                    let qid = match busy {
                        Some(qid) => qid,
                        None => break,
                    };
                    let signals = match st.queues.get(&qid) {
                        Some(q) => Arc::clone(&q.signals),
                        None => break,
                    };
                    st = signals.none_processing.wait(st).unwrap();
                }
            }
            st.shutdown = true;
            for w in self.shared.workers.iter() {
                w.pending.notify_all();
            }
            for q in st.queues.values() {
                q.signals.broadcast_all();
            }
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        pool_trace!(None, "pool shutdown complete");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown_inner(ShutdownMode::Kill);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.lock_state();
        f.debug_struct("Pool")
            .field("workers", &self.shared.workers.len())
            .field("queues", &st.queues.len())
            .field("njobs", &st.njobs)
            .field("nwaiting", &st.nwaiting)
            .field("shutdown", &st.shutdown)
            .finish()
    }
}

/// Main worker loop
///
/// Holds the pool mutex while scheduling, releases it around the work
/// function and parks on its own condition variable when no attached
/// queue is runnable.
fn worker_loop(shared: Arc<PoolShared>, idx: usize) {
    pool_trace!(Some(idx), "start (tid {:#x})", os_thread_id());

    let mut st = shared.lock_state();
    loop {
        if st.shutdown {
            break;
        }

        let (qid, job) = match st.take_job() {
            Some(taken) => taken,
            None => {
                st.idle.push(idx);
                st.nwaiting += 1;
                st = shared.workers[idx].pending.wait(st).unwrap();
                st.nwaiting -= 1;
                // A dispatcher that targeted us already popped our index;
                // after a broadcast or spurious wake it is still there.
                if let Some(pos) = st.idle.iter().rposition(|&i| i == idx) {
                    st.idle.remove(pos);
                }
                continue;
            }
        };

        let Job { serial, run } = job;
        drop(st);

        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(run));

        shared.completed.fetch_add(1, Ordering::Relaxed);
        st = shared.lock_state();
        match outcome {
            Ok(value) => {
                if let Some(q) = st.queues.get_mut(&qid) {
                    q.n_processing -= 1;
                    if q.in_only {
                        // Completion frees a slot in the combined budget.
                        q.signals.input_not_full.notify_all();
                    } else {
                        q.insert_result(OutSlot { serial, value });
                        q.signals.output_avail.notify_all();
                    }
                    if q.n_processing == 0 {
                        q.signals.none_processing.notify_all();
                    }
                }
                // A missing queue was destroyed mid-flight; the result
                // is dropped.
                pool_trace!(Some(idx), "{} s{} done", qid, serial);
                st.check_invariants();
            }
            Err(_) => {
                // A lost result would leave a hole in the serial stream
                // and hang the consumer; closing the queue signals it
                // instead.
                pool_fault!(Some(idx), "{} s{} panicked, shutting queue down", qid, serial);
                if let Some(q) = st.queues.get_mut(&qid) {
                    q.n_processing -= 1;
                    if q.n_processing == 0 {
                        q.signals.none_processing.notify_all();
                    }
                }
                st.shutdown_queue(qid);
            }
        }
    }
    drop(st);

    pool_trace!(Some(idx), "exit");
}
