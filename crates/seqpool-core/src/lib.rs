//! # seqpool-core
//!
//! Core types for the seqpool ordered thread pool.
//!
//! This crate is platform-agnostic and contains no threading code.
//! The pool, queues and worker scheduler live in the `seqpool` crate.
//!
//! ## Modules
//!
//! - `id` - queue identifier and serial number types
//! - `error` - error types
//! - `trace` - scheduler event tracing

pub mod error;
pub mod id;
pub mod trace;

// Re-exports for convenience
pub use error::{PoolError, PoolResult};
pub use id::{QueueId, Serial};

/// Shared defaults
pub mod constants {
    /// Fallback worker count when available parallelism is unknown
    pub const DEFAULT_WORKERS: usize = 4;

    /// Default per-side queue capacity
    pub const DEFAULT_QSIZE: usize = 16;

    /// Name prefix for worker threads
    pub const WORKER_THREAD_PREFIX: &str = "seqpool-worker";
}
