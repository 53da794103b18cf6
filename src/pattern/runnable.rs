//! Named worker thread with cooperative cancellation.
//!
//! The body receives a [`StopToken`] and is expected to return once
//! [`StopToken::is_stop_requested`] turns true. If the body blocks on its own
//! condition variable, the owner must wake it after [`Runnable::request_stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Result, SoniaError};

/// Cancellation flag handed to a [`Runnable`] body.
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Whether the owning [`Runnable`] asked the body to return.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A named OS thread that can be started and stopped.
#[derive(Debug)]
pub struct Runnable {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Runnable {
    /// Create a stopped runnable; `name` becomes the OS thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the thread running `body`.
    ///
    /// # Errors
    ///
    /// [`SoniaError::Logic`] if the thread is still running, [`SoniaError::Io`] if
    /// the OS refuses to spawn it.
    pub fn start<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(SoniaError::logic(format!(
                "Thread {} is already running",
                self.name
            )));
        }
        if let Some(finished) = handle.take() {
            Self::join(&self.name, finished);
        }

        self.stop.store(false, Ordering::SeqCst);
        let token = StopToken {
            flag: Arc::clone(&self.stop),
        };
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || body(token))
            .map_err(|e| SoniaError::io(format!("spawning thread {}", self.name), e))?;
        *handle = Some(spawned);
        debug!(thread = %self.name, "started");
        Ok(())
    }

    /// Ask the body to return without waiting for it.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the body to return and join the thread.
    ///
    /// # Errors
    ///
    /// [`SoniaError::Logic`] if the thread was never started or was already
    /// stopped, or if it is called from the worker thread itself.
    pub fn stop(&self) -> Result<()> {
        let handle = {
            let mut slot = self.handle.lock();
            let Some(running) = slot.as_ref() else {
                return Err(SoniaError::logic(format!(
                    "Thread {} is not running",
                    self.name
                )));
            };
            if running.thread().id() == thread::current().id() {
                return Err(SoniaError::logic(format!(
                    "Thread {} cannot stop itself",
                    self.name
                )));
            }
            slot.take()
        };
        self.request_stop();
        if let Some(handle) = handle {
            Self::join(&self.name, handle);
        }
        debug!(thread = %self.name, "stopped");
        Ok(())
    }

    /// Whether the thread has been started and its body has not returned.
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn join(name: &str, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!(thread = %name, "worker thread panicked");
        }
    }
}

impl Drop for Runnable {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            self.stop.store(true, Ordering::SeqCst);
            if handle.thread().id() != thread::current().id() {
                Self::join(&self.name, handle);
            }
        }
    }
}
