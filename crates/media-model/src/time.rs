//! Rational media time.
//!
//! Timestamps are stored as `value / timescale` seconds so that sources
//! with different clocks (48 kHz audio, 90 kHz video, 600-based editing
//! timebases) can be compared without rounding.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Default timescale used when converting from floating-point seconds.
pub const DEFAULT_TIMESCALE: u32 = 600;

/// A point in media time expressed as `value / timescale` seconds.
///
/// Equality and ordering compare the represented instant, so
/// `1/2 == 300/600`. A zero timescale is treated as zero seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    /// The stream origin.
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: DEFAULT_TIMESCALE,
    };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// Convert seconds into a time at the given timescale, rounding to the
    /// nearest tick.
    pub fn from_seconds(secs: f64, timescale: u32) -> Self {
        Self {
            value: (secs * timescale as f64).round() as i64,
            timescale,
        }
    }

    /// The time in seconds.
    pub fn seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }

    /// Express this time at another timescale, rounding toward zero.
    pub fn convert_scale(&self, timescale: u32) -> Self {
        if self.timescale == 0 || timescale == 0 {
            return Self::new(0, timescale);
        }
        let value = self.value as i128 * timescale as i128 / self.timescale as i128;
        Self::new(value as i64, timescale)
    }

    /// Sum of two times, `None` on overflow.
    ///
    /// The result uses the larger of the two timescales when they differ.
    pub fn checked_add(self, rhs: MediaTime) -> Option<MediaTime> {
        if self.timescale == rhs.timescale {
            return self
                .value
                .checked_add(rhs.value)
                .map(|value| MediaTime::new(value, self.timescale));
        }
        let timescale = self.timescale.max(rhs.timescale);
        let lhs = self.convert_scale(timescale);
        let rhs = rhs.convert_scale(timescale);
        lhs.value
            .checked_add(rhs.value)
            .map(|value| MediaTime::new(value, timescale))
    }

    /// Difference `self - rhs` in seconds.
    pub fn seconds_since(&self, rhs: MediaTime) -> f64 {
        self.seconds() - rhs.seconds()
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        let lhs = if self.timescale == 0 {
            0
        } else {
            self.value as i128 * other.timescale.max(1) as i128
        };
        let rhs = if other.timescale == 0 {
            0
        } else {
            other.value as i128 * self.timescale.max(1) as i128
        };
        (lhs, rhs)
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs, rhs) = self.cross(other);
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    /// Saturates at `i64::MAX` ticks instead of panicking.
    fn add(self, rhs: MediaTime) -> MediaTime {
        self.checked_add(rhs).unwrap_or(MediaTime::new(
            i64::MAX,
            self.timescale.max(rhs.timescale),
        ))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

/// A half-open range `[start, start + duration)` in media time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    /// Build a range from floating-point seconds at the default timescale.
    pub fn from_seconds(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start: MediaTime::from_seconds(start_secs, DEFAULT_TIMESCALE),
            duration: MediaTime::from_seconds(duration_secs, DEFAULT_TIMESCALE),
        }
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> MediaTime {
        self.start + self.duration
    }

    /// Whether `time` falls inside the range.
    pub fn contains(&self, time: MediaTime) -> bool {
        time >= self.start && time < self.end()
    }
}
