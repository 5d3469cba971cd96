//! Event instants and clocks
//!
//! An [`Instant`] is a plain `(epoch_second, nano_of_second)` pair so it can be
//! copied into pooled holders without allocation. [`SystemClock`] anchors the
//! wall clock once and advances it with the monotonic clock, so instants taken
//! from one clock never go backwards.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Point in time with nanosecond resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    epoch_second: i64,
    nano_of_second: u32,
}

impl Instant {
    pub const EPOCH: Instant = Instant {
        epoch_second: 0,
        nano_of_second: 0,
    };

    /// Build an instant, normalizing nanoseconds that overflow one second
    pub fn new(epoch_second: i64, nano_of_second: u32) -> Self {
        let extra = i64::from(nano_of_second) / NANOS_PER_SECOND;
        Self {
            epoch_second: epoch_second + extra,
            nano_of_second: (i64::from(nano_of_second) % NANOS_PER_SECOND) as u32,
        }
    }

    pub fn from_epoch_millis(millis: i64) -> Self {
        Self {
            epoch_second: millis.div_euclid(1000),
            nano_of_second: (millis.rem_euclid(1000) * 1_000_000) as u32,
        }
    }

    pub fn from_epoch_nanos(nanos: i64) -> Self {
        Self {
            epoch_second: nanos.div_euclid(NANOS_PER_SECOND),
            nano_of_second: nanos.rem_euclid(NANOS_PER_SECOND) as u32,
        }
    }

    #[inline]
    pub fn epoch_second(&self) -> i64 {
        self.epoch_second
    }

    #[inline]
    pub fn nano_of_second(&self) -> u32 {
        self.nano_of_second
    }

    #[inline]
    pub fn epoch_millis(&self) -> i64 {
        self.epoch_second * 1000 + i64::from(self.nano_of_second / 1_000_000)
    }

    #[inline]
    pub fn epoch_micros(&self) -> i64 {
        self.epoch_second * 1_000_000 + i64::from(self.nano_of_second / 1_000)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.epoch_second, self.nano_of_second)
            .single()
            .unwrap_or_default()
    }

    /// Whether both instants render identically at `precision`
    #[inline]
    pub fn is_equivalent(&self, other: &Instant, precision: Precision) -> bool {
        self.epoch_second == other.epoch_second
            && precision.truncate(self.nano_of_second) == precision.truncate(other.nano_of_second)
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self {
            epoch_second: datetime.timestamp(),
            nano_of_second: datetime.timestamp_subsec_nanos(),
        }
    }
}

impl From<SystemTime> for Instant {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                Self::from_epoch_nanos(-(d.as_nanos() as i64))
            }
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.epoch_second, self.nano_of_second)
    }
}

/// Resolution at which two instants are considered the same for rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Precision {
    Seconds,
    #[default]
    Millis,
    Micros,
    Nanos,
}

impl Precision {
    #[inline]
    fn truncate(self, nanos: u32) -> u32 {
        match self {
            Precision::Seconds => 0,
            Precision::Millis => nanos / 1_000_000,
            Precision::Micros => nanos / 1_000,
            Precision::Nanos => nanos,
        }
    }
}

/// Source of event instants
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock anchored once and advanced monotonically
#[derive(Debug)]
pub struct SystemClock {
    anchor_wall_nanos: i64,
    anchor: std::time::Instant,
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall = Instant::from(SystemTime::now());
        let anchor_wall_nanos =
            wall.epoch_second * NANOS_PER_SECOND + i64::from(wall.nano_of_second);
        Self {
            anchor_wall_nanos,
            anchor: std::time::Instant::now(),
            last: AtomicI64::new(anchor_wall_nanos),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let elapsed = self.anchor.elapsed().as_nanos() as i64;
        let candidate = self.anchor_wall_nanos.saturating_add(elapsed);
        // fetch_max keeps readings from different threads non-decreasing
        let previous = self.last.fetch_max(candidate, Ordering::AcqRel);
        Instant::from_epoch_nanos(previous.max(candidate))
    }
}

/// Clock returning a settable instant, for deterministic rendering
#[derive(Debug, Default)]
pub struct FixedClock {
    nanos: AtomicI64,
}

impl FixedClock {
    pub fn new(instant: Instant) -> Self {
        let clock = Self::default();
        clock.set(instant);
        clock
    }

    pub fn set(&self, instant: Instant) {
        self.nanos.store(
            instant.epoch_second * NANOS_PER_SECOND + i64::from(instant.nano_of_second),
            Ordering::Release,
        );
    }

    pub fn advance_nanos(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        Instant::from_epoch_nanos(self.nanos.load(Ordering::Acquire))
    }
}
