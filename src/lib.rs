//! # SONIA Common Library
//!
//! Shared building blocks for the SONIA AUV software stack: a blocking serial
//! transport, a thread-safe subject/observer core, and the capture/writer
//! adapters that connect device producers to consumers.
//!
//! ## Crate Structure
//!
//! - **`pattern`**: [`Subject`](pattern::Subject) and [`Observer`](pattern::Observer)
//!   with symmetric, non-owning links, plus [`Runnable`](pattern::Runnable)
//!   worker threads.
//! - **`io::serial`**: [`Serial`](io::serial::Serial), a POSIX terminal transport
//!   with inter-byte and total timeouts, line reads and control lines.
//! - **`io::capture`** / **`io::writer`**: running/streaming adapters turning a
//!   [`FrameSource`](io::FrameSource) into a subject and a
//!   [`FrameSink`](io::FrameSink) into an observer.
//! - **`io::serial_frames`**: sources and sinks backed by a shared serial port.
//! - **`sys::timer`**: monotonic stopwatch and deadline helpers.
//! - **`config`**: Figment-based configuration and soft named-parameter lookup.
//! - **`logging`**: explicit `tracing` subscriber setup.
//! - **`error`**: the [`SoniaError`](error::SoniaError) taxonomy.

pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod pattern;
pub mod sys;

pub use error::{Result, SoniaError};
