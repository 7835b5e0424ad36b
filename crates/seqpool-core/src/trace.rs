//! Scheduler event tracing
//!
//! Diagnostics for the pool's scheduling decisions, off unless the
//! `SEQPOOL_TRACE` environment variable is set to `1`, `true` or `on`.
//! Events are single stderr lines tagged with the worker that emitted
//! them (`w--` for producer/consumer-side events) and name the queue
//! and serial involved:
//!
//! ```text
//! seqpool: w0 start (tid 0x7fd1c56c0640)
//! seqpool: w1 q0 s14 done
//! seqpool: w-- q2 attached (5 jobs pending)
//! ```
//!
//! The hot dispatch/recv paths emit nothing; workers and queue
//! lifecycle operations emit one line per event.

use core::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

// Tracing switch: 0 = off, 1 = on, 2 = environment not read yet.
static STATE: AtomicU8 = AtomicU8::new(2);

/// True when `SEQPOOL_TRACE` asks for event lines
#[inline]
pub fn enabled() -> bool {
    match STATE.load(Ordering::Relaxed) {
        0 => false,
        1 => true,
        _ => {
            let on = matches!(
                std::env::var("SEQPOOL_TRACE").as_deref(),
                Ok("1") | Ok("true") | Ok("on")
            );
            STATE.store(on as u8, Ordering::Relaxed);
            on
        }
    }
}

/// Force tracing on or off, overriding the environment
pub fn set_enabled(on: bool) {
    STATE.store(on as u8, Ordering::Relaxed);
}

/// Write one event line: `seqpool: w<idx> <message>`
///
/// Takes the stderr lock for the whole line so concurrent workers
/// cannot interleave partial output.
#[doc(hidden)]
pub fn emit(worker: Option<usize>, args: fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut line = stderr.lock();
    let _ = match worker {
        Some(w) => write!(line, "seqpool: w{} ", w),
        None => write!(line, "seqpool: w-- "),
    };
    let _ = line.write_fmt(args);
    let _ = line.write_all(b"\n");
}

/// Emit a scheduler event when tracing is on
///
/// The first argument is the emitting worker's index; pass `None` for
/// events raised from queue or pool handles.
#[macro_export]
macro_rules! pool_trace {
    ($worker:expr, $($arg:tt)*) => {{
        if $crate::trace::enabled() {
            $crate::trace::emit($worker, format_args!($($arg)*));
        }
    }};
}

/// Report a fault to stderr regardless of the trace switch
#[macro_export]
macro_rules! pool_fault {
    ($worker:expr, $($arg:tt)*) => {{
        $crate::trace::emit($worker, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_and_macros() {
        set_enabled(true);
        assert!(enabled());

        set_enabled(false);
        assert!(!enabled());

        // Disabled, so these stay silent.
        pool_trace!(Some(3), "q{} s{} done", 1, 7);
        pool_trace!(None, "q{} attached", 2);
    }
}
