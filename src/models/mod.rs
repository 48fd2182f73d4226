//! Domain data model: samples, timeline items, and date intervals.

pub mod item;
pub mod sample;

pub use item::{
    TimelineItem, TimelineItemBase, TimelineItemTrip, TimelineItemVisit, TRIP_MINIMUM_KEEPER_DISTANCE,
    TRIP_MINIMUM_KEEPER_DURATION, TRIP_MINIMUM_VALID_DISTANCE, TRIP_MINIMUM_VALID_DURATION,
    TRIP_MINIMUM_VALID_SAMPLES, VISIT_MINIMUM_KEEPER_DURATION, VISIT_MINIMUM_VALID_DURATION,
};
pub use sample::{ActivityType, LocomotionSample, RecordingState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed date range. Change notifications and segments are both
/// parameterised by these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Duration in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    #[inline]
    pub fn intersects(&self, other: &DateInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[inline]
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn union(&self, other: &DateInterval) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Degenerate interval covering a single instant.
    pub fn instant(date: DateTime<Utc>) -> Self {
        Self { start: date, end: date }
    }
}
