//! Locomotion samples: the raw observations the timeline is built from.
//!
//! Samples are produced by the acquisition layer and never deleted; merges
//! and edge cleansing only reassign their `timeline_item_id`, and bad
//! samples are disabled in place.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recording engine state at the moment a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Off,
    Recording,
    Sleeping,
    DeepSleeping,
    Wakeup,
    Standby,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Off => "off",
            RecordingState::Recording => "recording",
            RecordingState::Sleeping => "sleeping",
            RecordingState::DeepSleeping => "deep_sleeping",
            RecordingState::Wakeup => "wakeup",
            RecordingState::Standby => "standby",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(RecordingState::Off),
            "recording" => Some(RecordingState::Recording),
            "sleeping" => Some(RecordingState::Sleeping),
            "deep_sleeping" => Some(RecordingState::DeepSleeping),
            "wakeup" => Some(RecordingState::Wakeup),
            "standby" => Some(RecordingState::Standby),
            _ => None,
        }
    }
}

/// Activity classification assigned by the classifier (consumed read-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Stationary,
    Walking,
    Running,
    Cycling,
    Car,
    Train,
    Bus,
    Motorcycle,
    Boat,
    Airplane,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Stationary => "stationary",
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::Car => "car",
            ActivityType::Train => "train",
            ActivityType::Bus => "bus",
            ActivityType::Motorcycle => "motorcycle",
            ActivityType::Boat => "boat",
            ActivityType::Airplane => "airplane",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stationary" => Some(ActivityType::Stationary),
            "walking" => Some(ActivityType::Walking),
            "running" => Some(ActivityType::Running),
            "cycling" => Some(ActivityType::Cycling),
            "car" => Some(ActivityType::Car),
            "train" => Some(ActivityType::Train),
            "bus" => Some(ActivityType::Bus),
            "motorcycle" => Some(ActivityType::Motorcycle),
            "boat" => Some(ActivityType::Boat),
            "airplane" => Some(ActivityType::Airplane),
            _ => None,
        }
    }
}

/// A single timestamped location/recording-state observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocomotionSample {
    pub id: String,
    pub date: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub horizontal_accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    pub recording_state: RecordingState,
    pub classified_activity_type: Option<ActivityType>,
    pub confirmed_activity_type: Option<ActivityType>,
    pub timeline_item_id: Option<String>,
    pub disabled: bool,
}

impl LocomotionSample {
    pub fn new(date: DateTime<Utc>, recording_state: RecordingState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            date,
            latitude: None,
            longitude: None,
            horizontal_accuracy: None,
            speed: None,
            course: None,
            altitude: None,
            recording_state,
            classified_activity_type: None,
            confirmed_activity_type: None,
            timeline_item_id: None,
            disabled: false,
        }
    }

    pub fn with_coordinate(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_classified_type(mut self, activity_type: ActivityType) -> Self {
        self.classified_activity_type = Some(activity_type);
        self
    }

    pub fn with_item(mut self, timeline_item_id: &str) -> Self {
        self.timeline_item_id = Some(timeline_item_id.to_string());
        self
    }

    /// Coordinate as a geo point (x = longitude, y = latitude), when fixed.
    #[inline]
    pub fn coordinate(&self) -> Option<Point<f64>> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    #[inline]
    pub fn has_usable_coordinate(&self) -> bool {
        self.coordinate().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_state_round_trips() {
        for state in [
            RecordingState::Off,
            RecordingState::Recording,
            RecordingState::Sleeping,
            RecordingState::DeepSleeping,
            RecordingState::Wakeup,
            RecordingState::Standby,
        ] {
            assert_eq!(RecordingState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RecordingState::parse("bogus"), None);
    }

    #[test]
    fn coordinate_requires_both_axes() {
        let date = Utc::now();
        let mut sample = LocomotionSample::new(date, RecordingState::Recording);
        assert!(sample.coordinate().is_none());

        sample.latitude = Some(-37.8183);
        assert!(sample.coordinate().is_none());

        sample.longitude = Some(144.9671);
        let point = sample.coordinate().unwrap();
        assert_eq!(point.y(), -37.8183);
        assert_eq!(point.x(), 144.9671);
    }
}
