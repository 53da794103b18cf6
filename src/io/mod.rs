//! Data transports and the adapters that connect them to the observer pattern.
//!
//! - [`serial`]: blocking serial transport over a terminal device.
//! - [`capture`]: turns a pull-based [`FrameSource`] into a notifying subject.
//! - [`writer`]: turns a push-based [`FrameSink`] into an observer.
//! - [`serial_frames`]: sources and sinks backed by a shared [`serial::Serial`].

pub mod capture;
pub mod serial;
pub mod serial_frames;
pub mod writer;

pub use capture::Capture;
pub use writer::Writer;

/// Producer of items, polled one at a time.
///
/// Implementations are driven from the capture thread and must be `Send`.
pub trait FrameSource<T>: Send {
    /// Fetch the next item, blocking as long as the device needs.
    fn next_frame(&mut self) -> anyhow::Result<T>;
}

/// Consumer of items.
pub trait FrameSink<T>: Send {
    /// Deliver one item.
    fn write_frame(&mut self, frame: &T) -> anyhow::Result<()>;
}
