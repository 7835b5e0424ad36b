//! Queue identifier and serial number types

use core::fmt;

/// Identifies a queue within its owning pool
///
/// Ids are allocated by the pool at queue creation and never reused for
/// the lifetime of the pool. The id stays valid across detach/attach.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct QueueId(u64);

impl QueueId {
    /// Create a new QueueId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        QueueId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Submission-order serial number within one queue
///
/// Every dispatched job is tagged with the queue's next serial; results
/// are released to the consumer strictly in serial order. Serials are
/// monotonically increasing and never reused within a queue.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Serial(u64);

impl Serial {
    /// First serial of every queue
    pub const ZERO: Serial = Serial(0);

    /// Create a Serial from a raw value
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Serial(raw)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The serial following this one
    #[inline]
    pub const fn next(self) -> Serial {
        Serial(self.0 + 1)
    }

    /// Post-increment: return the current serial and advance self
    #[inline]
    pub fn take(&mut self) -> Serial {
        let s = *self;
        self.0 += 1;
        s
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self.0)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_id_basics() {
        let id = QueueId::new(7);
        assert_eq!(id.as_u64(), 7);
        assert_eq!(format!("{}", id), "q7");
    }

    #[test]
    fn test_serial_ordering() {
        let a = Serial::ZERO;
        let b = a.next();
        assert!(a < b);
        assert_eq!(b.as_u64(), 1);
    }

    #[test]
    fn test_serial_take() {
        let mut s = Serial::ZERO;
        assert_eq!(s.take(), Serial::new(0));
        assert_eq!(s.take(), Serial::new(1));
        assert_eq!(s, Serial::new(2));
    }
}
