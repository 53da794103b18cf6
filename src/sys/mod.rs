//! System helpers shared by the I/O components.

pub mod timer;

pub use timer::{Deadline, Stopwatch};
