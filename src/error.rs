//! Custom error types for the library.
//!
//! This module defines the primary error type, `SoniaError`, shared by the serial
//! transport, the subject/observer core and the capture/writer adapters. Using the
//! `thiserror` crate, it gives every component the same small taxonomy so callers
//! can tell "fix your call" errors apart from "the device went away" errors.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidArgument`**: malformed configuration (empty port path, a framing value
//!   the platform cannot express). Always synchronous, never retried.
//! - **`PortNotOpened`**: I/O attempted on a closed serial port. Call `open()` first.
//! - **`Io`**: unrecoverable device-level failure (open failure, descriptor error,
//!   failed attribute application). Carries the failing operation as context.
//! - **`Logic`**: an adapter or lifecycle invariant was violated (pulling while
//!   streaming, writing while stopped, stopping a thread that is not running).
//! - **`AlreadyAttached`** / **`NotAttached`**: the subject/observer link invariant
//!   was violated.
//! - **`Config`**: wraps errors from `figment` when loading configuration files.
//! - **`Other`**: failures raised by collaborators (frame sources and sinks), which
//!   report through `anyhow`.
//!
//! Timeouts are deliberately absent: a read or write that times out returns the
//! number of bytes transferred instead of an error.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, SoniaError>;

/// Primary error type for `sonia_common`.
#[derive(Error, Debug)]
pub enum SoniaError {
    /// Malformed argument or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O requested on a serial port that is not open.
    #[error("Serial port not opened")]
    PortNotOpened,

    /// Device-level I/O failure.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// Operation that failed (e.g. "opening /dev/ttyUSB0").
        context: String,
        /// Underlying operating system error.
        #[source]
        source: std::io::Error,
    },

    /// Programming error: an adapter or lifecycle invariant was violated.
    #[error("Logic error: {0}")]
    Logic(String),

    /// The observer is already attached to the subject.
    #[error("Observer is already attached to this subject")]
    AlreadyAttached,

    /// The observer is not attached to the subject.
    #[error("Observer is not attached to this subject")]
    NotAttached,

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Failure reported by a frame source, frame sink or observer callback.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SoniaError {
    /// Wrap an operating system error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        SoniaError::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Build an `Io` error that has no underlying errno (e.g. a disconnected device).
    pub fn io_other(context: impl Into<String>, message: impl Into<String>) -> Self {
        SoniaError::Io {
            context: context.into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, message.into()),
        }
    }

    /// Shorthand for [`SoniaError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        SoniaError::InvalidArgument(message.into())
    }

    /// Shorthand for [`SoniaError::Logic`].
    pub fn logic(message: impl Into<String>) -> Self {
        SoniaError::Logic(message.into())
    }

    /// Whether the error is a caller mistake rather than a device or collaborator failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            SoniaError::InvalidArgument(_)
                | SoniaError::PortNotOpened
                | SoniaError::Logic(_)
                | SoniaError::AlreadyAttached
                | SoniaError::NotAttached
        )
    }
}

impl From<figment::Error> for SoniaError {
    fn from(value: figment::Error) -> Self {
        SoniaError::Config(Box::new(value))
    }
}
