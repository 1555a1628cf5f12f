// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by software bus operations.
//!
//! Validation failures are returned synchronously to the immediate caller.
//! Per-destination delivery failures during a fan-out send are *not* errors
//! of the send itself; they surface as events and metrics only.

/// Errors returned by software bus operations.
///
/// # Example
///
/// ```rust,no_run
/// use osb::{SoftwareBus, Error};
/// # fn demo(bus: &std::sync::Arc<SoftwareBus>) {
/// match bus.create_pipe(0, "cmd_pipe") {
///     Err(Error::BadArgument(msg)) => println!("rejected: {}", msg),
///     Err(e) => println!("other error: {}", e),
///     Ok(id) => println!("pipe {:?}", id),
/// }
/// # }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// Null/short buffer, out-of-range message id, unknown pipe or route,
    /// or a caller that does not own the pipe it is operating on.
    BadArgument(String),
    /// Requested header field does not exist for this message's layout
    /// (e.g. timestamp on a command, function code without a secondary header).
    WrongMessageType,
    /// Buffer handle failed pool validation (outside the arena or corrupted
    /// guard word).
    InvalidHandle,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// All pipe slots are in use.
    MaxPipesMet,
    /// The route index allocator is empty.
    MaxRoutesMet,
    /// The per-route destination ceiling was reached.
    MaxDestinationsMet,
    /// The buffer pool could not satisfy an allocation. Never blocks or
    /// retries; callers shed load.
    BufAllocationError,

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// Message length field exceeds the configured maximum message size.
    MessageTooBig { size: usize, max: usize },
    /// Destination pipe queue is full (non-fatal to the overall send).
    PipeFull,

    // ========================================================================
    // Receive Outcomes (expected, not bus failures)
    // ========================================================================
    /// Poll receive on an empty pipe.
    NoMessage,
    /// Timed receive expired before a message arrived.
    TimeOut,
    /// The pipe was deleted while a receive was pending on it.
    PipeDeleted,

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Host file I/O failed while writing an admin report.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Argument
            Error::BadArgument(msg) => write!(f, "Bad argument: {}", msg),
            Error::WrongMessageType => write!(f, "Field not present for this message type"),
            Error::InvalidHandle => write!(f, "Buffer handle failed validation"),
            // Resource
            Error::MaxPipesMet => write!(f, "Maximum pipe count reached"),
            Error::MaxRoutesMet => write!(f, "Maximum route count reached"),
            Error::MaxDestinationsMet => write!(f, "Maximum destinations per route reached"),
            Error::BufAllocationError => write!(f, "Buffer pool exhausted"),
            // Delivery
            Error::MessageTooBig { size, max } => {
                write!(f, "Message too big: {} bytes (max {})", size, max)
            }
            Error::PipeFull => write!(f, "Pipe queue full"),
            // Receive
            Error::NoMessage => write!(f, "No message available"),
            Error::TimeOut => write!(f, "Receive timed out"),
            Error::PipeDeleted => write!(f, "Pipe deleted while receive pending"),
            // Other
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::MessageTooBig { size: 70000, max: 32768 };
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("32768"));

        let e = Error::BadArgument("depth is zero".into());
        assert!(e.to_string().contains("depth is zero"));
    }

    #[test]
    fn test_io_source_preserved() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = Error::from(io);
        assert!(e.source().is_some());
    }
}
