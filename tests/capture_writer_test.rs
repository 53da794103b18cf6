//! Capture and writer adapters wired together through the subject/observer core.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::Mutex;
use sonia_common::io::{Capture, FrameSink, FrameSource, Writer};
use sonia_common::SoniaError;

// =============================================================================
// Test doubles
// =============================================================================

/// Counts up from 1; fails once `fail_after` frames have been produced.
struct Counter {
    next: u32,
    fail_after: Option<u32>,
}

impl Counter {
    fn endless() -> Self {
        Self {
            next: 0,
            fail_after: None,
        }
    }

    fn failing_after(frames: u32) -> Self {
        Self {
            next: 0,
            fail_after: Some(frames),
        }
    }
}

impl FrameSource<u32> for Counter {
    fn next_frame(&mut self) -> anyhow::Result<u32> {
        if self.fail_after.is_some_and(|limit| self.next >= limit) {
            bail!("sensor unplugged");
        }
        self.next += 1;
        Ok(self.next)
    }
}

/// Collects frames; rejects the values listed in `reject`.
#[derive(Clone, Default)]
struct Collect<T> {
    frames: Arc<Mutex<Vec<T>>>,
    reject: Vec<T>,
}

impl<T: Clone + PartialEq + Send + std::fmt::Debug> FrameSink<T> for Collect<T> {
    fn write_frame(&mut self, frame: &T) -> anyhow::Result<()> {
        if self.reject.contains(frame) {
            bail!("rejected {frame:?}");
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn streaming_writer<T: 'static>(sink: impl FrameSink<T> + 'static, capture: &Capture<T>) -> Writer<T>
where
    T: Send,
{
    let writer = Writer::new("collect", sink);
    writer.observe(capture.subject()).unwrap();
    writer.start();
    writer.set_streaming_mode(true);
    writer
}

// =============================================================================
// Streaming
// =============================================================================

#[test]
fn capture_streams_into_writer_in_order() {
    let capture = Capture::new("counter", Counter::endless());
    capture.set_max_framerate(500.0).unwrap();
    let sink = Collect::default();
    let writer = streaming_writer(sink.clone(), &capture);

    capture.set_streaming_mode(true);
    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.frames.lock().len() >= 10));
    capture.stop();

    let frames = sink.frames.lock().clone();
    let expected: Vec<u32> = (1..=u32::try_from(frames.len()).unwrap()).collect();
    assert_eq!(frames, expected);
    assert!(writer.frame_count() >= 10);
}

#[test]
fn capture_idles_until_both_running_and_streaming() {
    let capture = Capture::new("counter", Counter::endless());
    capture.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(capture.frame_count(), 0);

    capture.stop();
    capture.set_streaming_mode(true);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(capture.frame_count(), 0);

    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || capture.frame_count() > 0));
}

#[test]
fn stopped_capture_stops_producing() {
    let capture = Capture::new("counter", Counter::endless());
    capture.set_max_framerate(200.0).unwrap();
    capture.set_streaming_mode(true);
    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || capture.frame_count() >= 3));

    capture.stop();
    thread::sleep(Duration::from_millis(30));
    let settled = capture.frame_count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(capture.frame_count(), settled);
}

#[test]
fn framerate_limits_streaming() {
    let capture = Capture::new("counter", Counter::endless());
    capture.set_max_framerate(20.0).unwrap();
    capture.set_streaming_mode(true);
    capture.start().unwrap();

    thread::sleep(Duration::from_millis(500));
    capture.stop();

    let frames = capture.frame_count();
    assert!(frames >= 3, "too few frames: {frames}");
    assert!(frames <= 13, "throttle not applied: {frames}");
}

#[test]
fn get_frame_is_refused_while_streaming() {
    let capture = Capture::new("counter", Counter::endless());
    assert_eq!(capture.get_frame().unwrap(), 1);

    capture.set_streaming_mode(true);
    assert!(matches!(capture.get_frame(), Err(SoniaError::Logic(_))));

    capture.set_streaming_mode(false);
    assert_eq!(capture.get_frame().unwrap(), 2);
}

#[test]
fn source_error_stops_the_capture() {
    let capture = Capture::new("flaky", Counter::failing_after(3));
    let sink = Collect::default();
    let _writer = streaming_writer(sink.clone(), &capture);

    capture.set_streaming_mode(true);
    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !capture.is_running()));

    assert_eq!(capture.frame_count(), 3);
    assert_eq!(*sink.frames.lock(), vec![1, 2, 3]);
    assert!(capture.is_streaming());
}

#[test]
fn observer_error_does_not_stop_the_capture() {
    let capture = Capture::new("counter", Counter::endless());
    capture.set_max_framerate(500.0).unwrap();
    let sink = Collect {
        frames: Arc::default(),
        reject: vec![2],
    };
    let writer = streaming_writer(sink.clone(), &capture);

    capture.set_streaming_mode(true);
    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.frames.lock().len() >= 5));
    capture.stop();
    thread::sleep(Duration::from_millis(20));

    let frames = sink.frames.lock().clone();
    assert_eq!(&frames[..3], &[1, 3, 4]);
    assert!(capture.frame_count() < u64::from(*frames.last().unwrap()));
    assert_eq!(writer.frame_count(), frames.len() as u64);
}

// =============================================================================
// Writer direct mode
// =============================================================================

#[test]
fn writer_direct_mode_rules() {
    let sink = Collect::default();
    let writer = Writer::new("direct", sink.clone());

    assert!(matches!(writer.write(&1u32), Err(SoniaError::Logic(_))));

    writer.start();
    writer.write(&1).unwrap();
    writer.write(&2).unwrap();

    writer.set_streaming_mode(true);
    assert!(matches!(writer.write(&3), Err(SoniaError::Logic(_))));

    writer.set_streaming_mode(false);
    writer.stop();
    assert!(matches!(writer.write(&4), Err(SoniaError::Logic(_))));

    assert_eq!(*sink.frames.lock(), vec![1, 2]);
    assert_eq!(writer.frame_count(), 2);
}

#[test]
fn writer_ignores_notifications_when_not_streaming() {
    let capture = Capture::new("counter", Counter::endless());
    capture.set_max_framerate(500.0).unwrap();
    let sink = Collect::default();
    let writer = Writer::new("idle", sink.clone());
    writer.observe(capture.subject()).unwrap();
    writer.start();

    capture.set_streaming_mode(true);
    capture.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || capture.frame_count() >= 5));
    capture.stop();

    assert!(sink.frames.lock().is_empty());
    assert_eq!(writer.frame_count(), 0);
}

// =============================================================================
// Serial-backed adapters
// =============================================================================

#[cfg(unix)]
mod serial {
    use std::fs::File;
    use std::io::{Read, Write};

    use sonia_common::io::serial::{Serial, Timeout};
    use sonia_common::io::serial_frames::{SerialLineSource, SerialSink};

    use super::*;

    #[test]
    fn serial_lines_flow_from_capture_to_writer() {
        let pty = nix::pty::openpty(None, None).unwrap();
        let path = nix::unistd::ttyname(&pty.slave).unwrap();
        let mut device = File::from(pty.master);
        let serial = Arc::new(
            Serial::new(path.to_string_lossy(), 115_200, Timeout::simple(50)).unwrap(),
        );

        let capture = Capture::new("dvl", SerialLineSource::new(Arc::clone(&serial)));
        let sink: Collect<String> = Collect::default();
        let _writer = streaming_writer(sink.clone(), &capture);
        capture.set_streaming_mode(true);
        capture.start().unwrap();

        device.write_all(b"wrz,0.1\nwrz,0.2\n").unwrap();
        let lines = || {
            sink.frames
                .lock()
                .iter()
                .filter(|line| !line.is_empty())
                .cloned()
                .collect::<Vec<_>>()
        };
        assert!(wait_until(Duration::from_secs(5), || lines().len() >= 2));
        capture.stop();

        assert_eq!(lines(), vec!["wrz,0.1\n", "wrz,0.2\n"]);
        drop(pty.slave);
    }

    #[test]
    fn serial_sink_writes_frames_to_the_device() {
        let pty = nix::pty::openpty(None, None).unwrap();
        let path = nix::unistd::ttyname(&pty.slave).unwrap();
        let mut device = File::from(pty.master);
        let serial = Arc::new(
            Serial::new(path.to_string_lossy(), 115_200, Timeout::simple(50)).unwrap(),
        );

        let writer = Writer::new("thrusters", SerialSink::new(serial));
        writer.start();
        writer.write(&"T1 1500\n".to_string()).unwrap();

        let mut buf = [0u8; 8];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"T1 1500\n");
        drop(pty.slave);
    }
}
