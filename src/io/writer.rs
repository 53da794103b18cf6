//! Push adapter for frame consumers.
//!
//! A [`Writer`] wraps a [`FrameSink`]. It can be fed directly with
//! [`Writer::write`] while running with streaming off, or attached to a
//! [`Subject`] and fed by notifications while streaming is on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::FrameSink;
use crate::error::{Result, SoniaError};
use crate::pattern::{Listener, Observer, Subject, SubjectId};

struct Shared<T> {
    name: String,
    running: AtomicBool,
    streaming: AtomicBool,
    frame_count: AtomicU64,
    sink: Mutex<Box<dyn FrameSink<T>>>,
}

impl<T> Shared<T> {
    fn forward(&self, frame: &T) -> anyhow::Result<()> {
        self.sink.lock().write_frame(frame)?;
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct StreamListener<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Listener<T> for StreamListener<T> {
    fn on_notify(&self, _subject: SubjectId, frame: &T) -> anyhow::Result<()> {
        if !self.shared.streaming.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.forward(frame)
    }

    fn on_connected(&self, subject: SubjectId) {
        debug!(writer = %self.shared.name, %subject, "writer attached");
    }

    fn on_disconnected(&self, subject: SubjectId) {
        debug!(writer = %self.shared.name, %subject, "writer detached");
    }
}

/// Running/streaming state machine around a [`FrameSink`].
pub struct Writer<T> {
    shared: Arc<Shared<T>>,
    observer: Observer<T>,
}

impl<T: 'static> Writer<T> {
    /// Wrap `sink`. The writer starts stopped and not streaming.
    pub fn new<S>(name: impl Into<String>, sink: S) -> Self
    where
        S: FrameSink<T> + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            running: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            sink: Mutex::new(Box::new(sink)),
        });
        let observer = Observer::new(StreamListener {
            shared: Arc::clone(&shared),
        });
        Self { shared, observer }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Send one frame to the sink.
    ///
    /// # Errors
    ///
    /// [`SoniaError::Logic`] if the writer is stopped or streaming; the sink's own
    /// error otherwise.
    pub fn write(&self, frame: &T) -> Result<()> {
        if !self.is_running() {
            return Err(SoniaError::logic("Cannot write while the writer is stopped"));
        }
        if self.is_streaming() {
            return Err(SoniaError::logic("Cannot write directly while streaming"));
        }
        self.shared.forward(frame)?;
        Ok(())
    }

    /// Mark the writer running.
    pub fn start(&self) {
        self.shared.running.store(true, Ordering::SeqCst);
        info!(writer = %self.shared.name, "writer started");
    }

    /// Mark the writer stopped.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        info!(writer = %self.shared.name, "writer stopped");
    }

    /// Whether the writer is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Enable or disable forwarding of notifications.
    pub fn set_streaming_mode(&self, streaming: bool) {
        self.shared.streaming.store(streaming, Ordering::SeqCst);
        debug!(writer = %self.shared.name, streaming, "streaming mode changed");
    }

    /// Whether notifications are forwarded.
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    /// Frames delivered to the sink so far.
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    /// The observer fed by subjects.
    pub fn observer(&self) -> &Observer<T> {
        &self.observer
    }

    /// Attach this writer to `subject`.
    pub fn observe(&self, subject: &Subject<T>) -> Result<()> {
        self.observer.observe(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<u8>>>);

    impl FrameSink<u8> for Collect {
        fn write_frame(&mut self, frame: &u8) -> anyhow::Result<()> {
            self.0.lock().push(*frame);
            Ok(())
        }
    }

    #[test]
    fn direct_write_requires_running() {
        let writer = Writer::new("collect", Collect::default());
        assert!(matches!(writer.write(&1), Err(SoniaError::Logic(_))));
        writer.start();
        writer.write(&1).unwrap();
        assert_eq!(writer.frame_count(), 1);
    }

    #[test]
    fn direct_write_while_streaming_is_rejected() {
        let writer = Writer::new("collect", Collect::default());
        writer.start();
        writer.set_streaming_mode(true);
        assert!(matches!(writer.write(&1), Err(SoniaError::Logic(_))));
    }

    #[test]
    fn notifications_are_dropped_unless_streaming() {
        let sink = Collect::default();
        let writer = Writer::new("collect", sink.clone());
        let subject = Subject::new();
        writer.observe(&subject).unwrap();

        subject.notify(&1).unwrap();
        writer.set_streaming_mode(true);
        subject.notify(&2).unwrap();

        assert_eq!(*sink.0.lock(), vec![2]);
        assert_eq!(writer.frame_count(), 1);
    }
}
