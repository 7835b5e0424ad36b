//! # seqpool - ordered multi-queue thread pool
//!
//! A fixed set of worker threads serves any number of independently
//! created queues. Each queue tags submissions with a serial number and
//! releases results to its consumer in exactly that order, no matter how
//! the executions interleaved across workers.
//!
//! ## Features
//!
//! - **Ordered delivery**: per-queue results come back in submission
//!   order, buffered and released at the current serial
//! - **Backpressure**: producers block (or get `WouldBlock`) on a
//!   combined budget of queued + executing + buffered items
//! - **Fair scheduling**: round-robin over the attached queues, with a
//!   full output side pushing backpressure upstream
//! - **Targeted wakeup**: dispatch wakes exactly one worker, LIFO from
//!   the idle stack
//! - **Lifecycle**: attach/detach pauses a queue without losing state;
//!   drain or kill shutdown for the pool
//!
//! ## Quick Start
//!
//! ```ignore
//! use seqpool::{Pool, PoolResult, ShutdownMode};
//!
//! fn main() -> PoolResult<()> {
//!     let pool = Pool::new(4)?;
//!     let queue = pool.queue::<u64>(16)?;
//!     queue.attach();
//!
//!     for i in 0..100u64 {
//!         queue.dispatch(move || i * i)?;
//!     }
//!     for i in 0..100u64 {
//!         let done = queue.recv()?;
//!         assert_eq!(done.into_value(), i * i);
//!     }
//!
//!     drop(queue);
//!     pool.shutdown(ShutdownMode::Drain);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  producer ──► [input FIFO] ──┐                 ┌──► [output, serial-sorted] ──► consumer
//!                              │  ┌───────────┐  │
//!  producer ──► [input FIFO] ──┼─►│ worker × N │─┼──► [output, serial-sorted] ──► consumer
//!                              │  └───────────┘  │
//!  execute() ──► [input FIFO] ─┘   round-robin   └──► (discarded when in_only)
//! ```
//!
//! One mutex guards all shared state - pool counters, the idle-worker
//! stack and every queue's buffers - and work functions run with it
//! released. Keeping multi-queue coordination under a single lock is
//! what rules out lost wakeups across queue boundaries.

pub mod config;
pub mod pool;
pub mod queue;

pub use config::{PoolConfig, QueueConfig};
pub use pool::{Pool, ShutdownMode};
pub use queue::{Completed, SeqQueue};

// Re-export core types
pub use seqpool_core::error::{PoolError, PoolResult};
pub use seqpool_core::id::{QueueId, Serial};

// Re-export the trace switch for embedders
pub use seqpool_core::trace;
pub use seqpool_core::{pool_fault, pool_trace};
