//! Timeline items: visits and trips.
//!
//! An item is a contiguous slice of the timeline, either a stationary
//! *visit* (geofence circle) or a moving *trip* (distance, speed, activity
//! type). Items form a doubly-linked sequence through `previous_item_id` /
//! `next_item_id`. The hydrated [`TimelineItem`] bundle is a short-lived
//! in-memory projection; the store owns durable state.

use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, TimelineError};
use crate::models::sample::{ActivityType, LocomotionSample, RecordingState};
use crate::models::DateInterval;

// Validity/keepness thresholds. These are user-visible and must not drift.
pub const VISIT_MINIMUM_VALID_DURATION: f64 = 10.0;
pub const VISIT_MINIMUM_KEEPER_DURATION: f64 = 60.0;
pub const TRIP_MINIMUM_VALID_DURATION: f64 = 10.0;
pub const TRIP_MINIMUM_VALID_DISTANCE: f64 = 10.0;
pub const TRIP_MINIMUM_VALID_SAMPLES: usize = 2;
pub const TRIP_MINIMUM_KEEPER_DURATION: f64 = 60.0;
pub const TRIP_MINIMUM_KEEPER_DISTANCE: f64 = 20.0;

/// Floor for recomputed visit radii, metres.
const VISIT_MINIMUM_RADIUS: f64 = 10.0;

/// The topology node persisted in `timeline_item_base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItemBase {
    pub id: String,
    pub is_visit: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub source: String,
    pub previous_item_id: Option<String>,
    pub next_item_id: Option<String>,
    pub disabled: bool,
    pub deleted: bool,
    pub samples_changed: bool,
}

impl TimelineItemBase {
    pub fn new(is_visit: bool, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            is_visit,
            start_date,
            end_date,
            source: "recorder".to_string(),
            previous_item_id: None,
            next_item_id: None,
            disabled: false,
            deleted: false,
            samples_changed: false,
        }
    }

    #[inline]
    pub fn date_range(&self) -> DateInterval {
        DateInterval::new(self.start_date, self.end_date)
    }
}

/// Visit extension row: a geofence circle the samples cluster inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItemVisit {
    pub item_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

impl TimelineItemVisit {
    #[inline]
    pub fn center(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Circle test against the geofence.
    #[inline]
    pub fn contains(&self, coordinate: Point<f64>) -> bool {
        self.center().haversine_distance(&coordinate) <= self.radius
    }
}

/// Trip extension row. Distance and speed are recomputed from samples
/// whenever the base's `samples_changed` flag is observed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItemTrip {
    pub item_id: String,
    pub distance: Option<f64>,
    pub speed: Option<f64>,
    pub classified_activity_type: Option<ActivityType>,
    pub confirmed_activity_type: Option<ActivityType>,
}

impl TimelineItemTrip {
    /// The user-confirmed type wins over the classifier's.
    #[inline]
    pub fn activity_type(&self) -> Option<ActivityType> {
        self.confirmed_activity_type.or(self.classified_activity_type)
    }
}

/// Hydrated bundle: base + visit? + trip? + samples?.
///
/// Samples load lazily; predicates that need them return
/// [`TimelineError::SamplesNotLoaded`] when they are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub base: TimelineItemBase,
    pub visit: Option<TimelineItemVisit>,
    pub trip: Option<TimelineItemTrip>,
    pub samples: Option<Vec<LocomotionSample>>,
}

impl TimelineItem {
    #[inline]
    pub fn id(&self) -> &str {
        &self.base.id
    }

    #[inline]
    pub fn is_visit(&self) -> bool {
        self.base.is_visit
    }

    #[inline]
    pub fn is_trip(&self) -> bool {
        !self.base.is_visit
    }

    #[inline]
    pub fn date_range(&self) -> DateInterval {
        self.base.date_range()
    }

    /// Duration in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.date_range().duration()
    }

    /// Hydrated samples, ordered by date ascending.
    pub fn samples(&self) -> Result<&[LocomotionSample]> {
        self.samples
            .as_deref()
            .ok_or_else(|| TimelineError::SamplesNotLoaded(self.base.id.clone()))
    }

    pub fn activity_type(&self) -> Option<ActivityType> {
        self.trip.as_ref().and_then(|t| t.activity_type())
    }

    /// A trip whose every sample was recorded with the engine off.
    pub fn is_data_gap(&self) -> Result<bool> {
        if self.is_visit() {
            return Ok(false);
        }
        let samples = self.samples()?;
        Ok(!samples.is_empty()
            && samples.iter().all(|s| s.recording_state == RecordingState::Off))
    }

    /// "No location": an item with samples but no coordinate fixes.
    pub fn is_nolo(&self) -> Result<bool> {
        if self.is_data_gap()? {
            return Ok(false);
        }
        let samples = self.samples()?;
        Ok(!samples.is_empty() && !samples.iter().any(|s| s.has_usable_coordinate()))
    }

    pub fn is_valid(&self) -> Result<bool> {
        let samples = self.samples()?;
        if self.is_visit() {
            Ok(!samples.is_empty()
                && !self.is_nolo()?
                && self.duration() >= VISIT_MINIMUM_VALID_DURATION)
        } else {
            let distance_ok = match self.trip.as_ref().and_then(|t| t.distance) {
                Some(distance) => distance >= TRIP_MINIMUM_VALID_DISTANCE,
                None => true,
            };
            Ok(samples.len() >= TRIP_MINIMUM_VALID_SAMPLES
                && self.duration() >= TRIP_MINIMUM_VALID_DURATION
                && distance_ok)
        }
    }

    /// Durable enough to present to the user.
    pub fn is_worth_keeping(&self) -> Result<bool> {
        if !self.is_valid()? {
            return Ok(false);
        }
        if self.is_visit() {
            Ok(self.duration() >= VISIT_MINIMUM_KEEPER_DURATION)
        } else {
            let distance = self.trip.as_ref().and_then(|t| t.distance).unwrap_or(0.0);
            Ok(self.duration() >= TRIP_MINIMUM_KEEPER_DURATION
                && distance >= TRIP_MINIMUM_KEEPER_DISTANCE)
        }
    }

    /// 2 = worth keeping, 1 = valid, 0 = neither.
    pub fn keepness_score(&self) -> Result<u8> {
        if self.is_worth_keeping()? {
            Ok(2)
        } else if self.is_valid()? {
            Ok(1)
        } else {
            Ok(0)
        }
    }

    /// Whether `other` sits after this item on the timeline.
    #[inline]
    fn is_before(&self, other: &TimelineItem) -> bool {
        self.base.start_date <= other.base.start_date
    }

    /// Up to `count` samples from the edge facing `other`, ordered from
    /// the edge inward.
    pub fn edge_samples_toward(
        &self,
        other: &TimelineItem,
        count: usize,
    ) -> Result<Vec<&LocomotionSample>> {
        let samples = self.samples()?;
        if self.is_before(other) {
            Ok(samples.iter().rev().take(count).collect())
        } else {
            Ok(samples.iter().take(count).collect())
        }
    }

    /// The single sample nearest `other` in time.
    pub fn edge_sample_toward(&self, other: &TimelineItem) -> Result<Option<&LocomotionSample>> {
        Ok(self.edge_samples_toward(other, 1)?.into_iter().next())
    }

    /// The sample nearest `other` that has a usable coordinate.
    pub fn located_edge_sample_toward(
        &self,
        other: &TimelineItem,
    ) -> Result<Option<&LocomotionSample>> {
        let samples = self.samples()?;
        let mut iter: Box<dyn Iterator<Item = &LocomotionSample> + '_> = if self.is_before(other) {
            Box::new(samples.iter().rev())
        } else {
            Box::new(samples.iter())
        };
        Ok(iter.find(|s| s.has_usable_coordinate()))
    }

    /// Recompute derived state from hydrated samples and clear the
    /// `samples_changed` flag. Callers persist the result.
    pub fn update_from_samples(&mut self) -> Result<()> {
        let samples = self.samples()?.to_vec();
        let live: Vec<&LocomotionSample> = samples.iter().filter(|s| !s.disabled).collect();

        if let (Some(first), Some(last)) = (live.first(), live.last()) {
            self.base.start_date = first.date;
            self.base.end_date = last.date;
        }

        let located: Vec<Point<f64>> = live.iter().filter_map(|s| s.coordinate()).collect();

        if self.base.is_visit {
            if let Some(center) = centroid(&located) {
                let distances: Vec<f64> =
                    located.iter().map(|p| center.haversine_distance(p)).collect();
                let mean = distances.iter().sum::<f64>() / distances.len() as f64;
                let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>()
                    / distances.len() as f64;
                let radius = (mean + variance.sqrt()).max(VISIT_MINIMUM_RADIUS);
                match self.visit.as_mut() {
                    Some(visit) => {
                        visit.latitude = center.y();
                        visit.longitude = center.x();
                        visit.radius = radius;
                    }
                    None => {
                        self.visit = Some(TimelineItemVisit {
                            item_id: self.base.id.clone(),
                            latitude: center.y(),
                            longitude: center.x(),
                            radius,
                        });
                    }
                }
            }
        } else {
            let distance = path_distance(&located);
            let duration = self.duration();
            let speed = distance.and_then(|d| {
                if duration > 0.0 {
                    Some(d / duration)
                } else {
                    None
                }
            });
            let classified = modal_classified_type(&live);
            match self.trip.as_mut() {
                Some(trip) => {
                    trip.distance = distance;
                    trip.speed = speed;
                    trip.classified_activity_type = classified;
                }
                None => {
                    self.trip = Some(TimelineItemTrip {
                        item_id: self.base.id.clone(),
                        distance,
                        speed,
                        classified_activity_type: classified,
                        confirmed_activity_type: None,
                    });
                }
            }
        }

        self.base.samples_changed = false;
        Ok(())
    }
}

/// Coordinate centroid of a point set.
fn centroid(points: &[Point<f64>]) -> Option<Point<f64>> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lon = points.iter().map(|p| p.x()).sum::<f64>() / n;
    let lat = points.iter().map(|p| p.y()).sum::<f64>() / n;
    Some(Point::new(lon, lat))
}

/// Haversine path length over an ordered track. None with fewer than two fixes.
fn path_distance(points: &[Point<f64>]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    Some(
        points
            .windows(2)
            .map(|pair| pair[0].haversine_distance(&pair[1]))
            .sum(),
    )
}

/// Most frequent classifier result across the samples.
fn modal_classified_type(samples: &[&LocomotionSample]) -> Option<ActivityType> {
    let mut counts: HashMap<ActivityType, usize> = HashMap::new();
    for sample in samples {
        if let Some(activity_type) = sample.classified_activity_type {
            *counts.entry(activity_type).or_default() += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(t, _)| t)
}
