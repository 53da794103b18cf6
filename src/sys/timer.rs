//! Monotonic timers.
//!
//! - [`Stopwatch`]: a pausable elapsed-time counter, used to throttle capture loops.
//! - [`Deadline`]: a fixed expiry computed from a millisecond budget, used to bound
//!   the total duration of a serial read or write.
//!
//! Both are built on [`std::time::Instant`] so they are immune to wall-clock jumps.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, SoniaError};

#[derive(Debug, Clone, Copy)]
struct StopwatchState {
    running: bool,
    start: Instant,
    paused_at: Instant,
}

/// A thread-safe, pausable stopwatch.
///
/// A freshly created stopwatch is stopped and reports zero elapsed time until
/// [`Stopwatch::start`] is called.
#[derive(Debug)]
pub struct Stopwatch {
    state: Mutex<StopwatchState>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a stopped stopwatch.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(StopwatchState {
                running: false,
                start: now,
                paused_at: now,
            }),
        }
    }

    /// Create a stopwatch that is already running.
    pub fn started() -> Self {
        let watch = Self::new();
        watch.start();
        watch
    }

    /// Reset the elapsed time to zero and start counting.
    pub fn start(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.start = now;
        state.paused_at = now;
        state.running = true;
    }

    /// Reset the elapsed time to zero without changing the running state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.start = now;
        state.paused_at = now;
    }

    /// Freeze the elapsed time.
    ///
    /// # Errors
    ///
    /// Returns [`SoniaError::Logic`] if the stopwatch is not running.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(SoniaError::logic("The timer is not running"));
        }
        state.paused_at = Instant::now();
        state.running = false;
        Ok(())
    }

    /// Resume counting after [`Stopwatch::pause`], excluding the paused interval.
    ///
    /// # Errors
    ///
    /// Returns [`SoniaError::Logic`] if the stopwatch is already running.
    pub fn unpause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(SoniaError::logic("The timer is running"));
        }
        let paused_for = Instant::now().saturating_duration_since(state.paused_at);
        state.start += paused_for;
        state.running = true;
        Ok(())
    }

    /// Whether the stopwatch is currently counting.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Elapsed time since the last start/reset, excluding paused intervals.
    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock();
        if state.running {
            state.start.elapsed()
        } else {
            state.paused_at.saturating_duration_since(state.start)
        }
    }

    /// Elapsed time in fractional seconds.
    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Elapsed time in whole milliseconds.
    pub fn millis(&self) -> u128 {
        self.elapsed().as_millis()
    }
}

/// A point in time after which an operation must give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expiry: Instant,
}

impl Deadline {
    /// Deadline `millis` milliseconds from now.
    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// Deadline `budget` from now. Budgets that overflow the clock saturate far in
    /// the future.
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let expiry = now
            .checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));
        Self { expiry }
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expiry.saturating_duration_since(Instant::now())
    }

    /// Signed milliseconds left: negative once the deadline has passed.
    pub fn remaining_ms(&self) -> i64 {
        let now = Instant::now();
        if self.expiry >= now {
            i64::try_from((self.expiry - now).as_millis()).unwrap_or(i64::MAX)
        } else {
            -i64::try_from((now - self.expiry).as_millis()).unwrap_or(i64::MAX)
        }
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopped_stopwatch_reports_zero() {
        let watch = Stopwatch::new();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(watch.elapsed(), Duration::ZERO);
        assert!(!watch.is_running());
    }

    #[test]
    fn pause_freezes_elapsed_time() {
        let watch = Stopwatch::started();
        thread::sleep(Duration::from_millis(10));
        watch.pause().unwrap();
        let frozen = watch.elapsed();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(watch.elapsed(), frozen);
        assert!(frozen >= Duration::from_millis(10));
    }

    #[test]
    fn unpause_excludes_paused_interval() {
        let watch = Stopwatch::started();
        watch.pause().unwrap();
        thread::sleep(Duration::from_millis(30));
        watch.unpause().unwrap();
        assert!(watch.elapsed() < Duration::from_millis(30));
    }

    #[test]
    fn pause_and_unpause_check_state() {
        let watch = Stopwatch::new();
        assert!(matches!(watch.pause(), Err(SoniaError::Logic(_))));
        watch.start();
        assert!(matches!(watch.unpause(), Err(SoniaError::Logic(_))));
    }

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::after_millis(50);
        assert!(!deadline.expired());
        assert!(deadline.remaining() <= Duration::from_millis(50));
        thread::sleep(Duration::from_millis(60));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.remaining_ms() <= 0);
    }

    #[test]
    fn zero_deadline_is_already_expired() {
        assert!(Deadline::after_millis(0).expired());
    }
}
