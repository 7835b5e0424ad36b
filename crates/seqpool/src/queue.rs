//! Ordered job queues
//!
//! A queue is a pair of bounded buffers: an input FIFO of jobs awaiting a
//! worker and an output buffer of results kept sorted by submission
//! serial. Results are released to the consumer only at the current
//! serial, no matter which order the workers finished in.
//!
//! All mutable queue state lives inside the pool's single mutex and is
//! addressed by id; the condition variables are owned here but always
//! paired with that mutex.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar};

use seqpool_core::error::{PoolError, PoolResult};
use seqpool_core::id::{QueueId, Serial};
use seqpool_core::pool_trace;

use crate::config::QueueConfig;
use crate::pool::PoolShared;

/// Type-erased value produced by a work function
pub(crate) type Payload = Box<dyn Any + Send>;

/// Type-erased work function
pub(crate) type WorkFn = Box<dyn FnOnce() -> Payload + Send>;

/// A submitted job waiting on the input side
pub(crate) struct Job {
    pub(crate) serial: Serial,
    pub(crate) run: WorkFn,
}

/// A finished job buffered on the output side
pub(crate) struct OutSlot {
    pub(crate) serial: Serial,
    pub(crate) value: Payload,
}

/// Condition variables of one queue
///
/// No state of their own; every predicate they guard lives under the
/// pool mutex.
pub(crate) struct QueueSignals {
    /// Signalled on each new buffered result
    pub(crate) output_avail: Condvar,
    /// Signalled when the combined budget frees a slot
    pub(crate) input_not_full: Condvar,
    /// Signalled when the input side drains to empty
    pub(crate) input_empty: Condvar,
    /// Signalled when the number of executing jobs reaches zero
    pub(crate) none_processing: Condvar,
}

impl QueueSignals {
    pub(crate) fn new() -> Self {
        Self {
            output_avail: Condvar::new(),
            input_not_full: Condvar::new(),
            input_empty: Condvar::new(),
            none_processing: Condvar::new(),
        }
    }

    /// Wake every waiter on every condition (queue or pool shutdown)
    pub(crate) fn broadcast_all(&self) {
        self.output_avail.notify_all();
        self.input_not_full.notify_all();
        self.input_empty.notify_all();
        self.none_processing.notify_all();
    }
}

/// Mutable queue state, guarded by the pool mutex
pub(crate) struct QueueState {
    pub(crate) qsize: usize,
    pub(crate) in_only: bool,
    /// Jobs queued but not yet taken by a worker
    pub(crate) input: VecDeque<Job>,
    /// Results sorted ascending by serial
    pub(crate) output: VecDeque<OutSlot>,
    /// Jobs taken but not yet finished
    pub(crate) n_processing: usize,
    /// Serial assigned to the next submission
    pub(crate) next_serial: Serial,
    /// Serial of the next result to deliver
    pub(crate) curr_serial: Serial,
    pub(crate) shutdown: bool,
    pub(crate) attached: bool,
    pub(crate) signals: Arc<QueueSignals>,
}

impl QueueState {
    pub(crate) fn new(config: &QueueConfig, signals: Arc<QueueSignals>) -> Self {
        Self {
            qsize: config.qsize,
            in_only: config.in_only,
            input: VecDeque::new(),
            output: VecDeque::new(),
            n_processing: 0,
            next_serial: Serial::ZERO,
            curr_serial: Serial::ZERO,
            shutdown: false,
            attached: false,
            signals,
        }
    }

    /// Combined-budget gate: a producer must wait while this holds, so
    /// that even if every in-flight job became a result the output side
    /// could hold them
    pub(crate) fn budget_full(&self) -> bool {
        self.input.len() + self.n_processing + self.output.len() >= self.qsize
    }

    /// Insert a finished job keeping the output sorted by serial
    ///
    /// Completions are near-ordered, so this normally appends at the tail;
    /// the buffer is bounded by qsize either way.
    pub(crate) fn insert_result(&mut self, slot: OutSlot) {
        let at = self.output.partition_point(|s| s.serial < slot.serial);
        self.output.insert(at, slot);
    }

    /// Take the head result iff it carries the next serial due
    pub(crate) fn pop_ready(&mut self) -> Option<OutSlot> {
        match self.output.front() {
            Some(slot) if slot.serial == self.curr_serial => {
                self.curr_serial = self.curr_serial.next();
                self.output.pop_front()
            }
            _ => None,
        }
    }

    /// Queued + executing + buffered item count
    pub(crate) fn size(&self) -> usize {
        self.output.len() + self.input.len() + self.n_processing
    }
}

/// A result delivered in submission order
#[derive(Debug)]
pub struct Completed<T> {
    serial: Serial,
    value: T,
}

impl<T> Completed<T> {
    /// Serial the originating job was tagged with at dispatch
    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// Borrow the value returned by the work function
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume into the value returned by the work function
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: 'static> Completed<T> {
    fn from_slot(slot: OutSlot) -> Self {
        // The typed handle is the only dispatcher into its queue, so the
        // payload is always a T.
        let value = slot
            .value
            .downcast::<T>()
            .expect("queue payload type mismatch");
        Completed {
            serial: slot.serial,
            value: *value,
        }
    }
}

/// Handle to an ordered queue served by a [`Pool`](crate::Pool)
///
/// The handle owns the queue: dropping it shuts the queue down, unlinks
/// it from the scheduler and releases its buffers. Producers and
/// consumers share it by reference (every method takes `&self`), or
/// through an `Arc` when they live on independent threads.
///
/// A queue is created detached; call [`attach`](SeqQueue::attach) before
/// dispatching. Detaching later pauses scheduling without losing queued
/// jobs, buffered results or serial bookkeeping.
pub struct SeqQueue<T> {
    pool: Arc<PoolShared>,
    id: QueueId,
    qsize: usize,
    signals: Arc<QueueSignals>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SeqQueue<T> {
    pub(crate) fn new(
        pool: Arc<PoolShared>,
        id: QueueId,
        signals: Arc<QueueSignals>,
        qsize: usize,
    ) -> Self {
        Self {
            pool,
            id,
            qsize,
            signals,
            _marker: PhantomData,
        }
    }

    /// Make the queue visible to the pool scheduler
    ///
    /// Wakes idle workers if jobs are already queued. Attaching an
    /// attached or shut-down queue is a no-op.
    pub fn attach(&self) {
        let mut st = self.pool.lock_state();
        let pending = match st.queues.get_mut(&self.id) {
            Some(q) => {
                if q.shutdown || q.attached {
                    return;
                }
                q.attached = true;
                q.input.len()
            }
            None => return,
        };
        st.njobs += pending;
        st.ring.push_back(self.id);
        pool_trace!(None, "{} attached ({} jobs pending)", self.id, pending);
        for _ in 0..pending {
            match st.idle.pop() {
                Some(widx) => self.pool.notify_worker(widx),
                None => break,
            }
        }
    }

    /// Hide the queue from the pool scheduler
    ///
    /// Workers already executing jobs from this queue finish normally;
    /// no new jobs are taken. Queued jobs, buffered results and serial
    /// counters persist and survive a later re-attach.
    pub fn detach(&self) {
        let mut st = self.pool.lock_state();
        let pending = match st.queues.get_mut(&self.id) {
            Some(q) if q.attached => {
                q.attached = false;
                q.input.len()
            }
            _ => return,
        };
        st.njobs -= pending;
        st.ring.retain(|&qid| qid != self.id);
        pool_trace!(None, "{} detached", self.id);
    }

    /// Shut the queue down
    ///
    /// Refuses new dispatches, discards queued jobs not yet taken and
    /// wakes every waiter. In-flight jobs run to completion; their
    /// results remain consumable in order, after which `recv` reports
    /// the queue closed.
    pub fn shutdown(&self) {
        let mut st = self.pool.lock_state();
        st.shutdown_queue(self.id);
    }

    /// Wait until no job of this queue is queued or executing
    ///
    /// Returns as soon as `pending() == 0` and nothing is processing;
    /// buffered results are left for the consumer. Dispatching
    /// concurrently with flush prolongs it. Fails `Closed` when the pool
    /// is killed while waiting.
    pub fn flush(&self) -> PoolResult<()> {
        let mut st = self.pool.lock_state();
        loop {
            let q = match st.queues.get(&self.id) {
                Some(q) => q,
                None => return Err(PoolError::Closed),
            };
            if q.input.is_empty() && q.n_processing == 0 {
                return Ok(());
            }
            if st.shutdown {
                return Err(PoolError::Closed);
            }
            st = self.signals.none_processing.wait(st).unwrap();
        }
    }

    /// Number of buffered results awaiting the consumer
    pub fn len(&self) -> usize {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(0, |q| q.output.len())
    }

    /// Number of jobs queued, executing or buffered
    pub fn sz(&self) -> usize {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(0, |q| q.size())
    }

    /// True when nothing is queued, executing or buffered
    pub fn is_empty(&self) -> bool {
        self.sz() == 0
    }

    /// Number of jobs queued but not yet taken by a worker
    pub fn pending(&self) -> usize {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(0, |q| q.input.len())
    }

    /// Serial the next dispatch will be tagged with
    pub fn next_serial(&self) -> Serial {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(Serial::ZERO, |q| q.next_serial)
    }

    /// Serial of the next result due to the consumer
    pub fn curr_serial(&self) -> Serial {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(Serial::ZERO, |q| q.curr_serial)
    }

    /// True while the queue is visible to the scheduler
    pub fn is_attached(&self) -> bool {
        let st = self.pool.lock_state();
        st.queues.get(&self.id).map_or(false, |q| q.attached)
    }

    /// Per-side capacity fixed at creation
    pub fn qsize(&self) -> usize {
        self.qsize
    }

    /// Pool-unique id of this queue
    pub fn id(&self) -> QueueId {
        self.id
    }
}

impl<T: Send + 'static> SeqQueue<T> {
    /// Submit a job, blocking while the combined budget is full
    ///
    /// Waits while `pending + processing + buffered >= qsize`. Fails
    /// `Closed` if the queue or pool shuts down while waiting and
    /// `Detached` when the queue is not attached.
    pub fn dispatch<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.dispatch_erased(self.id, box_work(f), true)
    }

    /// Submit a job without blocking
    ///
    /// Fails `WouldBlock` instead of waiting when the combined budget
    /// is full.
    pub fn try_dispatch<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.dispatch_erased(self.id, box_work(f), false)
    }

    /// Wait for the next in-order result
    ///
    /// Buffered results are only released at the current serial, so this
    /// blocks until the job submitted `curr_serial`-th finishes even if
    /// later jobs already did. After shutdown the remaining ordered
    /// results are still delivered, then `Closed`.
    pub fn recv(&self) -> PoolResult<Completed<T>> {
        let mut st = self.pool.lock_state();
        loop {
            let q = match st.queues.get_mut(&self.id) {
                Some(q) => q,
                None => return Err(PoolError::Closed),
            };
            if q.in_only {
                return Err(PoolError::Closed);
            }
            if let Some(slot) = q.pop_ready() {
                q.signals.input_not_full.notify_all();
                return Ok(Completed::from_slot(slot));
            }
            let queue_down = q.shutdown;
            if queue_down || st.shutdown {
                return Err(PoolError::Closed);
            }
            st = self.signals.output_avail.wait(st).unwrap();
        }
    }

    /// Take the next in-order result if it is already buffered
    ///
    /// Returns `None` when the result due next has not finished yet,
    /// even if later results are buffered.
    pub fn try_recv(&self) -> Option<Completed<T>> {
        let mut st = self.pool.lock_state();
        let q = st.queues.get_mut(&self.id)?;
        let slot = q.pop_ready()?;
        q.signals.input_not_full.notify_all();
        Some(Completed::from_slot(slot))
    }
}

impl<T> fmt::Debug for SeqQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.pool.lock_state();
        let mut d = f.debug_struct("SeqQueue");
        d.field("id", &self.id).field("qsize", &self.qsize);
        if let Some(q) = st.queues.get(&self.id) {
            d.field("pending", &q.input.len())
                .field("processing", &q.n_processing)
                .field("buffered", &q.output.len())
                .field("attached", &q.attached)
                .field("shutdown", &q.shutdown);
        }
        d.finish()
    }
}

impl<T> Drop for SeqQueue<T> {
    fn drop(&mut self) {
        let mut st = self.pool.lock_state();
        st.shutdown_queue(self.id);
        st.ring.retain(|&qid| qid != self.id);
        st.queues.remove(&self.id);
    }
}

fn box_work<T, F>(f: F) -> WorkFn
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Box::new(move || Box::new(f()) as Payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, ShutdownMode};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_ordered_delivery_despite_scrambled_completion() {
        let pool = Pool::new(4).unwrap();
        let queue = Arc::new(pool.queue::<usize>(16).unwrap());
        queue.attach();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..100usize {
                    queue
                        .dispatch(move || {
                            thread::sleep(Duration::from_millis(((97 * i) % 23) as u64));
                            i
                        })
                        .unwrap();
                }
            })
        };

        for i in 0..100u64 {
            let done = queue.recv().unwrap();
            assert_eq!(done.serial(), Serial::new(i));
            assert_eq!(done.into_value(), i as usize);
        }

        producer.join().unwrap();
        assert!(queue.is_empty());
        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_try_dispatch_backpressure() {
        let pool = Pool::new(2).unwrap();
        let queue = pool.queue::<usize>(4).unwrap();
        queue.attach();

        let mut ok = 0;
        let mut full = 0;
        for i in 0..10usize {
            let outcome = queue.try_dispatch(move || {
                thread::sleep(Duration::from_millis(150));
                i
            });
            match outcome {
                Ok(()) => ok += 1,
                Err(PoolError::WouldBlock) => full += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, 4);
        assert_eq!(full, 6);

        // The budget only frees when a result is consumed.
        let first = queue.recv().unwrap();
        assert_eq!(first.serial(), Serial::ZERO);
        assert!(wait_until(5000, || queue.try_dispatch(|| 99usize).is_ok()));

        pool.shutdown(ShutdownMode::Kill);
    }

    #[test]
    fn test_out_of_order_result_held_back() {
        let pool = Pool::new(2).unwrap();
        let queue = pool.queue::<usize>(8).unwrap();
        queue.attach();

        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        queue
            .dispatch(move || {
                while !gate.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(2));
                }
                0
            })
            .unwrap();
        queue.dispatch(|| 1usize).unwrap();

        // Job 1 finishes first, but serial 0 is still running.
        assert!(wait_until(5000, || queue.len() == 1));
        assert!(queue.try_recv().is_none());

        release.store(true, Ordering::Release);
        assert_eq!(queue.recv().unwrap().into_value(), 0);
        assert_eq!(queue.recv().unwrap().into_value(), 1);

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_detach_pauses_reattach_resumes() {
        let pool = Pool::new(2).unwrap();
        let q = pool.queue::<usize>(8).unwrap();
        let other = pool.queue::<usize>(8).unwrap();
        q.attach();
        other.attach();

        // Park both workers inside jobs of the other queue so nothing
        // can be taken from q yet.
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));
        for i in 0..2usize {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            other
                .dispatch(move || {
                    started.fetch_add(1, Ordering::SeqCst);
                    while !release.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(2));
                    }
                    i
                })
                .unwrap();
        }
        assert!(wait_until(5000, || started.load(Ordering::SeqCst) == 2));

        for i in 0..5usize {
            q.dispatch(move || i + 100).unwrap();
        }
        q.detach();
        assert_eq!(q.pending(), 5);

        for i in 2..7usize {
            other.dispatch(move || i).unwrap();
        }
        release.store(true, Ordering::Release);
        for _ in 0..7 {
            other.recv().unwrap();
        }

        // The other queue fully drained while q sat detached, untouched.
        assert_eq!(q.pending(), 5);
        assert_eq!(q.len(), 0);
        assert!(!q.is_attached());

        q.attach();
        for i in 0..5usize {
            assert_eq!(q.recv().unwrap().into_value(), i + 100);
        }

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_in_only_discards_results() {
        let pool = Pool::new(4).unwrap();
        let queue: SeqQueue<()> = pool
            .queue_with(QueueConfig::new().qsize(16).in_only(true))
            .unwrap();
        queue.attach();

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let count = Arc::clone(&count);
            queue
                .dispatch(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.flush().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1000);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.sz(), 0);
        assert_eq!(queue.next_serial(), Serial::new(1000));
        assert_eq!(queue.curr_serial(), Serial::ZERO);
        assert!(queue.try_recv().is_none());
        assert_eq!(queue.recv().unwrap_err(), PoolError::Closed);

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_shutdown_drains_then_closes() {
        let pool = Pool::new(2).unwrap();
        let queue = pool.queue::<usize>(8).unwrap();
        queue.attach();

        for i in 0..3usize {
            queue.dispatch(move || i).unwrap();
        }
        assert!(wait_until(5000, || queue.len() == 3));

        queue.shutdown();
        assert_eq!(queue.dispatch(|| 9usize).unwrap_err(), PoolError::Closed);

        for i in 0..3usize {
            assert_eq!(queue.recv().unwrap().into_value(), i);
        }
        assert_eq!(queue.recv().unwrap_err(), PoolError::Closed);

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_shutdown_discards_untaken_jobs() {
        let pool = Pool::new(1).unwrap();
        let queue = pool.queue::<usize>(8).unwrap();
        queue.attach();

        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        queue
            .dispatch(move || {
                while !gate.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(2));
                }
                0
            })
            .unwrap();
        for i in 1..5usize {
            queue.dispatch(move || i).unwrap();
        }
        assert!(wait_until(5000, || queue.sz() == 5 && queue.pending() == 4));

        queue.shutdown();
        assert_eq!(queue.pending(), 0);

        release.store(true, Ordering::Release);
        // The in-flight job still delivers; the discarded ones never do.
        assert_eq!(queue.recv().unwrap().into_value(), 0);
        assert_eq!(queue.recv().unwrap_err(), PoolError::Closed);

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_dispatch_detached_fails() {
        let pool = Pool::new(1).unwrap();
        let queue = pool.queue::<usize>(4).unwrap();
        assert_eq!(queue.dispatch(|| 1usize).unwrap_err(), PoolError::Detached);

        queue.attach();
        assert!(queue.dispatch(|| 1usize).is_ok());
        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_flush_idempotent_on_quiescent_queue() {
        let pool = Pool::new(2).unwrap();
        let queue = pool.queue::<usize>(8).unwrap();
        queue.attach();

        queue.flush().unwrap();
        queue.flush().unwrap();

        for i in 0..6usize {
            queue.dispatch(move || {
                thread::sleep(Duration::from_millis(5));
                i
            }).unwrap();
        }
        queue.flush().unwrap();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.len(), 6);
        assert_eq!(queue.sz(), 6);

        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_introspection_empty_queue() {
        let pool = Pool::new(1).unwrap();
        let queue = pool.queue::<usize>(4).unwrap();
        assert_eq!(queue.qsize(), 4);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.sz(), 0);
        assert!(queue.is_empty());
        assert!(!queue.is_attached());
        assert_eq!(queue.next_serial(), Serial::ZERO);
        assert_eq!(queue.curr_serial(), Serial::ZERO);
        pool.shutdown(ShutdownMode::Kill);
    }
}
