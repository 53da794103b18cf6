//! Frame adapters over a shared [`Serial`] port.
//!
//! [`SerialLineSource`] feeds a [`Capture`](super::Capture) with text lines;
//! [`SerialSink`] lets a [`Writer`](super::Writer) push frames to a device.

use std::sync::Arc;

use anyhow::{bail, Context};

use super::serial::{Serial, DEFAULT_EOL, DEFAULT_MAX_LINE_LENGTH};
use super::{FrameSink, FrameSource};

/// Produces one line per frame from a serial port.
#[derive(Debug, Clone)]
pub struct SerialLineSource {
    serial: Arc<Serial>,
    max_len: usize,
    eol: String,
}

impl SerialLineSource {
    /// Read `\n`-terminated lines of up to [`DEFAULT_MAX_LINE_LENGTH`] bytes.
    pub fn new(serial: Arc<Serial>) -> Self {
        Self {
            serial,
            max_len: DEFAULT_MAX_LINE_LENGTH,
            eol: DEFAULT_EOL.to_string(),
        }
    }

    /// Use a different end-of-line marker.
    pub fn with_eol(mut self, eol: impl Into<String>) -> Self {
        self.eol = eol.into();
        self
    }

    /// Cap the length of a single line.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

impl FrameSource<String> for SerialLineSource {
    /// An empty frame means the read timed out before any byte arrived.
    fn next_frame(&mut self) -> anyhow::Result<String> {
        self.serial
            .read_line(self.max_len, &self.eol)
            .with_context(|| format!("reading a line from {}", self.serial.port()))
    }
}

/// Writes every frame to a serial port.
#[derive(Debug, Clone)]
pub struct SerialSink {
    serial: Arc<Serial>,
}

impl SerialSink {
    /// Write to `serial`.
    pub fn new(serial: Arc<Serial>) -> Self {
        Self { serial }
    }
}

impl<T: AsRef<[u8]>> FrameSink<T> for SerialSink {
    fn write_frame(&mut self, frame: &T) -> anyhow::Result<()> {
        let data = frame.as_ref();
        let written = self
            .serial
            .write(data)
            .with_context(|| format!("writing a frame to {}", self.serial.port()))?;
        if written < data.len() {
            bail!(
                "short write to {}: {written} of {} bytes",
                self.serial.port(),
                data.len()
            );
        }
        Ok(())
    }
}
