//! Pool and queue configuration

use seqpool_core::constants::{DEFAULT_QSIZE, DEFAULT_WORKERS, WORKER_THREAD_PREFIX};
use seqpool_core::error::{PoolError, PoolResult};

/// Configuration for a pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads (defaults to CPU count)
    pub workers: usize,

    /// Worker thread name prefix; threads are named `<prefix>-<index>`
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: detected_workers(),
            thread_name: WORKER_THREAD_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration honoring `SEQPOOL_WORKERS`
    ///
    /// Unset falls back to the detected CPU count. A set value must
    /// parse as a positive integer; anything else fails with
    /// `InvalidConfig` rather than silently running with a worker count
    /// the environment did not actually specify.
    pub fn from_env() -> PoolResult<Self> {
        let config = Self::default();
        match std::env::var("SEQPOOL_WORKERS") {
            Ok(v) => match v.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(config.workers(n)),
                _ => Err(PoolError::InvalidConfig(
                    "SEQPOOL_WORKERS must be a positive integer",
                )),
            },
            Err(_) => Ok(config),
        }
    }

    /// Set number of worker threads
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Set the worker thread name prefix
    pub fn thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 {
            return Err("workers must be at least 1");
        }
        if self.thread_name.is_empty() {
            return Err("thread_name must not be empty");
        }
        Ok(())
    }
}

/// CPU count, with a fixed fallback when detection fails
fn detected_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_WORKERS)
}

/// Configuration for a queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum items per side; also the combined budget a producer
    /// may have queued, executing and buffered at once
    pub qsize: usize,

    /// If true, results are discarded instead of buffered
    pub in_only: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            qsize: DEFAULT_QSIZE,
            in_only: false,
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-side capacity
    pub fn qsize(mut self, n: usize) -> Self {
        self.qsize = n;
        self
    }

    /// Suppress result collection
    pub fn in_only(mut self, yes: bool) -> Self {
        self.in_only = yes;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.qsize == 0 {
            return Err("qsize must be at least 1");
        }
        Ok(())
    }
}
