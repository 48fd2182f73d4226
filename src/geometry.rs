//! Inter-item geometry: time gaps, haversine distances, and the
//! mergeable-distance gate used by both scoring and edge cleansing.

use geo::{HaversineDistance, Point};

use crate::error::Result;
use crate::models::{DateInterval, TimelineItem};

/// Floor for the visit↔trip mergeable distance, metres.
pub const VISIT_TRIP_MINIMUM_MERGEABLE_DISTANCE: f64 = 150.0;

/// Slope applied to peer speed when scaling mergeable distance with the
/// time gap between items.
pub const MERGEABLE_DISTANCE_SPEED_FACTOR: f64 = 4.0;

/// Signed seconds between two date ranges: positive = gap, negative =
/// overlap duration, zero at exact abutment.
pub fn time_interval(a: &DateInterval, b: &DateInterval) -> f64 {
    if a.end <= b.start {
        return seconds(b.start - a.end);
    }
    if b.end <= a.start {
        return seconds(a.start - b.end);
    }
    let overlap_start = a.start.max(b.start);
    let overlap_end = a.end.min(b.end);
    -seconds(overlap_end - overlap_start)
}

#[inline]
fn seconds(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[inline]
pub fn haversine(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

fn visit_center(item: &TimelineItem) -> Option<Point<f64>> {
    if !item.is_visit() {
        return None;
    }
    item.visit.as_ref().map(|v| v.center())
}

/// Distance between two items: visit centers where available, otherwise
/// the closest located edge samples. None when either side has no usable
/// coordinate.
pub fn distance_between(a: &TimelineItem, b: &TimelineItem) -> Result<Option<f64>> {
    let a_point = match visit_center(a) {
        Some(center) => Some(center),
        None => a.located_edge_sample_toward(b)?.and_then(|s| s.coordinate()),
    };
    let b_point = match visit_center(b) {
        Some(center) => Some(center),
        None => b.located_edge_sample_toward(a)?.and_then(|s| s.coordinate()),
    };
    match (a_point, b_point) {
        (Some(pa), Some(pb)) => Ok(Some(haversine(pa, pb))),
        _ => Ok(None),
    }
}

/// The distance cap inside which two items remain mergeable. None means
/// unbounded (visit↔visit).
pub fn maximum_mergeable_distance(
    a: &TimelineItem,
    b: &TimelineItem,
    time_gap: f64,
) -> Option<f64> {
    match (a.is_visit(), b.is_visit()) {
        (true, true) => None,
        (true, false) | (false, true) => {
            let trip = if a.is_trip() { a } else { b };
            let speed = trip.trip.as_ref().and_then(|t| t.speed).unwrap_or(0.0);
            Some(
                (MERGEABLE_DISTANCE_SPEED_FACTOR * speed * time_gap.abs())
                    .max(VISIT_TRIP_MINIMUM_MERGEABLE_DISTANCE),
            )
        }
        (false, false) => {
            let speeds: Vec<f64> = [a, b]
                .iter()
                .filter_map(|item| item.trip.as_ref().and_then(|t| t.speed))
                .filter(|s| *s > 0.0)
                .collect();
            if speeds.is_empty() {
                return Some(0.0);
            }
            let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
            Some(MERGEABLE_DISTANCE_SPEED_FACTOR * mean * time_gap.abs())
        }
    }
}

/// The merge gate: nolo items and temporally overlapping items always
/// pass; everything else must sit within the mergeable distance.
pub fn is_within_mergeable_distance(a: &TimelineItem, b: &TimelineItem) -> Result<bool> {
    if a.is_nolo()? || b.is_nolo()? {
        return Ok(true);
    }
    let gap = time_interval(&a.date_range(), &b.date_range());
    if gap < 0.0 {
        return Ok(true);
    }
    let distance = match distance_between(a, b)? {
        Some(d) => d,
        None => return Ok(false),
    };
    match maximum_mergeable_distance(a, b, gap) {
        None => Ok(true),
        Some(max) => Ok(distance <= max),
    }
}

/// Visit overlap test: temporal overlap plus intersecting geofences.
pub fn visits_overlap(a: &TimelineItem, b: &TimelineItem) -> bool {
    let (Some(va), Some(vb)) = (a.visit.as_ref(), b.visit.as_ref()) else {
        return false;
    };
    if time_interval(&a.date_range(), &b.date_range()) >= 0.0 {
        return false;
    }
    haversine(va.center(), vb.center()) <= va.radius + vb.radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocomotionSample, RecordingState, TimelineItemBase, TimelineItemTrip, TimelineItemVisit};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn range(start: i64, end: i64) -> DateInterval {
        DateInterval::new(at(start), at(end))
    }

    #[test]
    fn time_interval_signs() {
        // Gap of 10s.
        assert_eq!(time_interval(&range(0, 100), &range(110, 200)), 10.0);
        // Symmetric.
        assert_eq!(time_interval(&range(110, 200), &range(0, 100)), 10.0);
        // Exact abutment is zero.
        assert_eq!(time_interval(&range(0, 100), &range(100, 200)), 0.0);
        // One second of overlap is -1.
        assert_eq!(time_interval(&range(0, 100), &range(99, 200)), -1.0);
    }

    fn trip_with_speed(start: i64, end: i64, speed: Option<f64>) -> TimelineItem {
        let base = TimelineItemBase::new(false, at(start), at(end));
        let samples = vec![
            LocomotionSample::new(at(start), RecordingState::Recording)
                .with_coordinate(-37.8183, 144.9671)
                .with_item(&base.id),
            LocomotionSample::new(at(end), RecordingState::Recording)
                .with_coordinate(-37.8190, 144.9671)
                .with_item(&base.id),
        ];
        TimelineItem {
            trip: Some(TimelineItemTrip {
                item_id: base.id.clone(),
                distance: Some(50.0),
                speed,
                classified_activity_type: None,
                confirmed_activity_type: None,
            }),
            visit: None,
            samples: Some(samples),
            base,
        }
    }

    fn visit(start: i64, end: i64, lat: f64, lon: f64) -> TimelineItem {
        let base = TimelineItemBase::new(true, at(start), at(end));
        let samples = vec![LocomotionSample::new(at(start), RecordingState::Recording)
            .with_coordinate(lat, lon)
            .with_item(&base.id)];
        TimelineItem {
            visit: Some(TimelineItemVisit {
                item_id: base.id.clone(),
                latitude: lat,
                longitude: lon,
                radius: 30.0,
            }),
            trip: None,
            samples: Some(samples),
            base,
        }
    }

    #[test]
    fn visit_trip_mergeable_distance_never_below_floor() {
        let v = visit(0, 100, -37.8183, 144.9671);
        // Slow trip, tiny gap: the 150m floor wins.
        let t = trip_with_speed(101, 200, Some(0.1));
        let max = maximum_mergeable_distance(&v, &t, 1.0).unwrap();
        assert_eq!(max, VISIT_TRIP_MINIMUM_MERGEABLE_DISTANCE);
        // Fast trip, long gap: the slope wins.
        let max = maximum_mergeable_distance(&v, &trip_with_speed(101, 200, Some(10.0)), 60.0)
            .unwrap();
        assert_eq!(max, 4.0 * 10.0 * 60.0);
    }

    #[test]
    fn trip_trip_uses_mean_nonzero_speed() {
        let a = trip_with_speed(0, 100, Some(2.0));
        let b = trip_with_speed(110, 200, Some(0.0));
        // Zero speeds are excluded from the mean.
        assert_eq!(maximum_mergeable_distance(&a, &b, 10.0).unwrap(), 4.0 * 2.0 * 10.0);
        let c = trip_with_speed(110, 200, None);
        assert_eq!(maximum_mergeable_distance(&a, &c, 10.0).unwrap(), 80.0);
        // No speeds at all collapses the cap to zero.
        let d = trip_with_speed(0, 100, None);
        assert_eq!(maximum_mergeable_distance(&d, &c, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn overlapping_items_always_mergeable() {
        let a = trip_with_speed(0, 100, Some(0.0));
        let b = trip_with_speed(50, 150, Some(0.0));
        assert!(is_within_mergeable_distance(&a, &b).unwrap());
    }

    #[test]
    fn visits_always_within_mergeable_distance() {
        // Two visits far apart in space and time: visit↔visit is unbounded.
        let a = visit(0, 100, -37.8183, 144.9671);
        let b = visit(7200, 7300, -37.9000, 145.1000);
        assert!(is_within_mergeable_distance(&a, &b).unwrap());
    }

    #[test]
    fn visits_overlap_needs_time_and_space() {
        let a = visit(0, 100, -37.8183, 144.9671);
        let b = visit(50, 150, -37.8183, 144.9672);
        assert!(visits_overlap(&a, &b));
        // Disjoint in time.
        let c = visit(200, 300, -37.8183, 144.9672);
        assert!(!visits_overlap(&a, &c));
        // Far apart in space.
        let d = visit(50, 150, -37.9000, 145.1000);
        assert!(!visits_overlap(&a, &d));
    }
}
