//! Pull-to-push adapter for frame producers.
//!
//! A [`Capture`] wraps a [`FrameSource`] and offers two ways to consume it:
//!
//! - **Pull**: call [`Capture::get_frame`] while streaming is off.
//! - **Stream**: enable streaming and start the capture; a background thread then
//!   fetches frames at up to [`Capture::max_framerate`] Hz and publishes each one
//!   through [`Capture::subject`].
//!
//! The background thread is spawned on the first [`Capture::start`] and lives
//! until the capture is dropped. While it is not both running and streaming it
//! sleeps on a condition variable.
//!
//! # Example
//!
//! ```
//! use sonia_common::io::{Capture, FrameSource};
//!
//! struct Counter(u32);
//!
//! impl FrameSource<u32> for Counter {
//!     fn next_frame(&mut self) -> anyhow::Result<u32> {
//!         self.0 += 1;
//!         Ok(self.0)
//!     }
//! }
//!
//! let capture = Capture::new("counter", Counter(0));
//! assert_eq!(capture.get_frame()?, 1);
//! assert_eq!(capture.frame_count(), 1);
//! # Ok::<(), sonia_common::error::SoniaError>(())
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::FrameSource;
use crate::error::{Result, SoniaError};
use crate::pattern::{Runnable, StopToken, Subject};
use crate::sys::timer::Stopwatch;

#[derive(Debug, Default)]
struct CaptureState {
    running: bool,
    streaming: bool,
    /// Hz; zero means unbounded.
    max_framerate: f64,
}

impl CaptureState {
    fn active(&self) -> bool {
        self.running && self.streaming
    }

    fn frame_period(&self) -> Option<Duration> {
        (self.max_framerate > 0.0).then(|| Duration::from_secs_f64(1.0 / self.max_framerate))
    }
}

struct Shared<T> {
    name: String,
    state: Mutex<CaptureState>,
    changed: Condvar,
    frame_count: AtomicU64,
    source: Mutex<Box<dyn FrameSource<T>>>,
    subject: Subject<T>,
}

/// Running/streaming state machine around a [`FrameSource`].
pub struct Capture<T> {
    shared: Arc<Shared<T>>,
    worker: Runnable,
}

impl<T: Send + 'static> Capture<T> {
    /// Wrap `source`. The capture starts stopped, not streaming and unthrottled.
    pub fn new<S>(name: impl Into<String>, source: S) -> Self
    where
        S: FrameSource<T> + 'static,
    {
        let name = name.into();
        Self {
            worker: Runnable::new(format!("capture-{name}")),
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(CaptureState::default()),
                changed: Condvar::new(),
                frame_count: AtomicU64::new(0),
                source: Mutex::new(Box::new(source)),
                subject: Subject::new(),
            }),
        }
    }

    /// Name used in logs and for the capture thread.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Subject publishing streamed frames.
    pub fn subject(&self) -> &Subject<T> {
        &self.shared.subject
    }

    /// Fetch one frame directly from the source.
    ///
    /// # Errors
    ///
    /// [`SoniaError::Logic`] while streaming; the source's own error otherwise.
    pub fn get_frame(&self) -> Result<T> {
        if self.is_streaming() {
            return Err(SoniaError::logic("Cannot pull a frame while streaming"));
        }
        let frame = self.shared.source.lock().next_frame()?;
        self.shared.frame_count.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    /// Mark the capture running and wake the background thread, spawning it on
    /// first use.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.running = true;
        if !self.worker.is_running() {
            let shared = Arc::clone(&self.shared);
            self.worker
                .start(move |token| capture_loop(&shared, &token))?;
        }
        self.shared.changed.notify_all();
        info!(capture = %self.shared.name, streaming = state.streaming, "capture started");
        Ok(())
    }

    /// Clear the running flag. The background thread stays alive.
    pub fn stop(&self) {
        self.shared.state.lock().running = false;
        self.shared.changed.notify_all();
        info!(capture = %self.shared.name, "capture stopped");
    }

    /// Whether the capture is running.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Enable or disable streaming.
    pub fn set_streaming_mode(&self, streaming: bool) {
        self.shared.state.lock().streaming = streaming;
        self.shared.changed.notify_all();
        debug!(capture = %self.shared.name, streaming, "streaming mode changed");
    }

    /// Whether streaming is enabled.
    pub fn is_streaming(&self) -> bool {
        self.shared.state.lock().streaming
    }

    /// Frames delivered so far, pulled or streamed.
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    /// Streaming rate limit in Hz; zero means unbounded.
    pub fn max_framerate(&self) -> f64 {
        self.shared.state.lock().max_framerate
    }

    /// Set the streaming rate limit in Hz; zero removes the limit.
    ///
    /// # Errors
    ///
    /// [`SoniaError::InvalidArgument`] for negative or non-finite rates.
    pub fn set_max_framerate(&self, framerate: f64) -> Result<()> {
        if !framerate.is_finite() || framerate < 0.0 {
            return Err(SoniaError::invalid(format!(
                "framerate must be a finite, non-negative number, got {framerate}"
            )));
        }
        self.shared.state.lock().max_framerate = framerate;
        self.shared.changed.notify_all();
        Ok(())
    }
}

fn capture_loop<T>(shared: &Shared<T>, token: &StopToken) {
    let throttle = Stopwatch::started();
    'capture: loop {
        {
            let mut state = shared.state.lock();
            loop {
                if token.is_stop_requested() {
                    break 'capture;
                }
                if !state.active() {
                    shared.changed.wait(&mut state);
                    continue;
                }
                let Some(period) = state.frame_period() else {
                    break;
                };
                let elapsed = throttle.elapsed();
                if elapsed >= period {
                    break;
                }
                shared.changed.wait_for(&mut state, period - elapsed);
            }
        }

        throttle.start();
        let frame = shared.source.lock().next_frame();
        match frame {
            Ok(frame) => match shared.subject.notify(&frame) {
                Ok(()) => {
                    shared.frame_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(capture = %shared.name, error = %err, "observer rejected frame");
                }
            },
            Err(err) => {
                error!(capture = %shared.name, error = %err, "frame source failed, stopping capture");
                shared.state.lock().running = false;
                shared.changed.notify_all();
            }
        }
    }
    debug!(capture = %shared.name, "capture loop exited");
}

impl<T> Drop for Capture<T> {
    fn drop(&mut self) {
        self.worker.request_stop();
        let _state = self.shared.state.lock();
        self.shared.changed.notify_all();
        // The worker is joined when `self.worker` is dropped.
    }
}
