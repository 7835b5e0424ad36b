//! Error types for pool and queue operations

use core::fmt;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur in pool and queue operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Non-blocking dispatch found the queue's combined budget full
    WouldBlock,

    /// The queue or the whole pool has been shut down
    Closed,

    /// Dispatch to a queue that is not attached to the pool scheduler
    Detached,

    /// Worker thread creation failed during pool construction
    Spawn(std::io::ErrorKind),

    /// Invalid configuration value at create time
    InvalidConfig(&'static str),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::WouldBlock => write!(f, "queue is full"),
            PoolError::Closed => write!(f, "queue closed"),
            PoolError::Detached => write!(f, "queue not attached to pool"),
            PoolError::Spawn(kind) => write!(f, "worker thread spawn failed: {:?}", kind),
            PoolError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Spawn(e.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", PoolError::WouldBlock), "queue is full");
        assert_eq!(format!("{}", PoolError::Closed), "queue closed");
        assert_eq!(
            format!("{}", PoolError::InvalidConfig("workers must be at least 1")),
            "invalid configuration: workers must be at least 1"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        let e: PoolError = io.into();
        assert!(matches!(e, PoolError::Spawn(std::io::ErrorKind::WouldBlock)));
    }
}
