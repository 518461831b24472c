//! Time math for CGM data processing
//!
//! Every component in the engine speaks epoch milliseconds. This module
//! provides the unit conversions and the named horizons shared across the
//! record store, plugins and alarm engine, plus a clock abstraction so that
//! evaluation time can be pinned in tests and during retro playback:
//! - System clock (normal live operation)
//! - Fixed clock (tests, deterministic cache aging)

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Milliseconds per second.
pub const MS_PER_SECOND: u64 = 1000;

/// Milliseconds per minute.
pub const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;

/// Milliseconds per hour.
pub const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Milliseconds per day.
pub const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Nominal CGM reporting cadence.
pub const FIVE_MINS_MS: u64 = 5 * MS_PER_MINUTE;

/// Bucket slack for readings that arrive slightly late.
pub const SIX_MINS_MS: u64 = 6 * MS_PER_MINUTE;

/// Horizon within which a reading counts as "current".
pub const FIFTEEN_MINS_MS: u64 = 15 * MS_PER_MINUTE;

/// Recency window for device-reported IOB/COB.
pub const THIRTY_MINS_MS: u64 = 30 * MS_PER_MINUTE;

/// Default retention window for incremental time-series merges.
pub const TWO_DAYS_MS: u64 = 2 * MS_PER_DAY;

/// Convert whole seconds to milliseconds.
pub const fn secs_to_ms(secs: u64) -> u64 {
    secs * MS_PER_SECOND
}

/// Convert whole minutes to milliseconds.
pub const fn mins_to_ms(mins: u64) -> u64 {
    mins * MS_PER_MINUTE
}

/// Convert whole hours to milliseconds.
pub const fn hours_to_ms(hours: u64) -> u64 {
    hours * MS_PER_HOUR
}

/// Convert whole days to milliseconds.
pub const fn days_to_ms(days: u64) -> u64 {
    days * MS_PER_DAY
}

/// Convert fractional minutes to milliseconds, rounding to the nearest ms.
pub fn mins_to_ms_f64(mins: f64) -> u64 {
    (mins * MS_PER_MINUTE as f64).round().max(0.0) as u64
}

/// Elapsed minutes between two timestamps as a float.
///
/// Negative when `later` precedes `earlier`; callers decide whether that
/// means "in the future" or "out of order".
pub fn elapsed_mins(earlier: Timestamp, later: Timestamp) -> f64 {
    (later as f64 - earlier as f64) / MS_PER_MINUTE as f64
}

/// Source of time for the engine
pub trait TimeSource {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// System clock time source
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Fixed time source for testing and retro playback
#[derive(Debug, Clone)]
pub struct FixedTime {
    timestamp: std::cell::Cell<Timestamp>,
}

impl FixedTime {
    /// Create a clock pinned at `timestamp`.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp: std::cell::Cell::new(timestamp),
        }
    }

    /// Move the clock to an absolute timestamp.
    pub fn set(&self, timestamp: Timestamp) {
        self.timestamp.set(timestamp);
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.timestamp.set(self.timestamp.get() + ms);
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        self.timestamp.get()
    }
}
