//! Time provider abstraction
//!
//! The document throttles outbound flushes against a [`Clock`], so production code
//! runs on real system time while tests drive a [`FixedClock`] by hand.
//!
//! # Example
//!
//! ```
//! use livetree::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let millis = clock.now_millis();
//! assert!(millis > 0);
//! ```

use std::fmt::Debug;
#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A time provider for getting current timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Production clock using real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "testing"))]
/// Manually driven clock for tests.
///
/// Available with the `testing` feature.
///
/// Time only moves through [`advance`](FixedClock::advance) and
/// [`set`](FixedClock::set), unless auto-advance is switched on, in which case every
/// `now_millis()` call moves the clock forward by one millisecond. Use `hold()` to
/// freeze an auto-advancing clock.
///
/// # Example
///
/// ```
/// use livetree::{Clock, FixedClock};
///
/// let clock = FixedClock::new(1000);
/// assert_eq!(clock.now_millis(), 1000);
/// clock.advance(150);
/// assert_eq!(clock.now_millis(), 1150);
///
/// let ticking = FixedClock::auto_advancing(1000);
/// let t1 = ticking.now_millis();
/// let t2 = ticking.now_millis();
/// assert!(t2 > t1);
/// ```
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicU64,
    auto_advance: bool,
    held: AtomicBool,
}

#[cfg(any(test, feature = "testing"))]
/// RAII guard that freezes a [`FixedClock`] while held.
pub struct ClockHold<'a>(&'a FixedClock);

#[cfg(any(test, feature = "testing"))]
impl Drop for ClockHold<'_> {
    fn drop(&mut self) {
        self.0.held.store(false, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    /// Create a clock that stays at `millis` until advanced.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
            auto_advance: false,
            held: AtomicBool::new(false),
        }
    }

    /// Create a clock that advances by one millisecond on every read.
    pub fn auto_advancing(millis: u64) -> Self {
        Self {
            auto_advance: true,
            ..Self::new(millis)
        }
    }

    /// Freeze the clock until the guard is dropped.
    pub fn hold(&self) -> ClockHold<'_> {
        self.held.store(true, Ordering::SeqCst);
        ClockHold(self)
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to a specific time in milliseconds.
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }

    /// Get the current time without advancing.
    pub fn get(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        if self.auto_advance && !self.held.load(Ordering::SeqCst) {
            self.millis.fetch_add(1, Ordering::SeqCst)
        } else {
            self.millis.load(Ordering::SeqCst)
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clone for FixedClock {
    fn clone(&self) -> Self {
        // Clone creates an independent clock at the current value, not held
        Self {
            millis: AtomicU64::new(self.get()),
            auto_advance: self.auto_advance,
            held: AtomicBool::new(false),
        }
    }
}
