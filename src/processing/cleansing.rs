//! Edge cleansing: reassigning boundary samples between neighbouring
//! items until the trip/visit boundaries stop moving.
//!
//! A trip edge that the classifier thinks belongs to the neighbouring
//! trip's mode migrates there; trip samples that landed inside an
//! adjacent visit's geofence are absorbed by the visit, and visit edges
//! that wandered outside it are released to the trip. Every move
//! reassigns the sample's owner and re-marks both endpoints
//! `samples_changed`.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Result, TimelineError};
use crate::geometry::{is_within_mergeable_distance, time_interval};
use crate::models::TimelineItem;
use crate::processing::linked_list::TimelineLinkedList;
use crate::store::{queries, Database};

/// Cap on boundary samples moved per item per processing call.
pub const MAX_EDGE_STEALS: usize = 30;

/// Neighbours further apart than this are left alone, seconds.
pub const EDGE_NEIGHBOUR_MAX_TIME_INTERVAL: f64 = 600.0;

/// A visit whose two edge samples span more than this is done cleansing
/// against that trip, seconds.
pub const VISIT_EDGE_PAIR_MAX_DURATION: f64 = 120.0;

/// 2 km/h in m/s: edges on opposite sides of this speed belong to
/// different movement modes and never swap.
pub const MAX_MODE_SHIFT_SPEED: f64 = 2.0 / 3.6;

#[derive(Debug, Clone)]
struct MoveDecision {
    sample_id: String,
    from_id: String,
    to_id: String,
}

/// Run the cleansing fixpoint across the window. `excluding` carries the
/// samples already moved by earlier processing calls; the returned set is
/// everything moved by this one.
pub fn sanitise_edges(
    list: &mut TimelineLinkedList,
    db: &Database,
    excluding: &HashSet<String>,
) -> Result<HashSet<String>> {
    let mut all_moved: HashSet<String> = HashSet::new();

    for item_id in list.item_ids_ordered() {
        let mut item_moved: HashSet<String> = HashSet::new();
        loop {
            if !list.contains(&item_id) {
                break;
            }
            let mut exclusion = excluding.clone();
            exclusion.extend(all_moved.iter().cloned());

            let moved = cleanse_item(list, db, &item_id, &exclusion)?;
            if moved.is_empty() {
                break;
            }
            // Cycle guard: a sample coming back means we are ping-ponging.
            if moved.iter().any(|id| all_moved.contains(id)) {
                break;
            }
            for id in moved {
                item_moved.insert(id.clone());
                all_moved.insert(id);
            }
            if item_moved.len() >= MAX_EDGE_STEALS {
                debug!(item = %item_id, "edge steal cap reached");
                break;
            }
        }
    }

    Ok(all_moved)
}

/// One cleansing pass for a single item: try both neighbours, apply any
/// move immediately, and report what moved.
fn cleanse_item(
    list: &mut TimelineLinkedList,
    db: &Database,
    item_id: &str,
    excluding: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut moved = Vec::new();

    for toward_next in [false, true] {
        let decision = {
            let Some(item) = list.get(item_id) else { break };
            let neighbour = if toward_next {
                list.next_item(item_id)
            } else {
                list.previous_item(item_id)
            };
            let Some(neighbour) = neighbour else { continue };

            // Only same-source trip neighbours in close temporal range.
            if neighbour.is_visit() || neighbour.base.source != item.base.source {
                continue;
            }
            if time_interval(&item.date_range(), &neighbour.date_range())
                >= EDGE_NEIGHBOUR_MAX_TIME_INTERVAL
            {
                continue;
            }
            if !is_within_mergeable_distance(item, neighbour)? {
                continue;
            }

            if item.is_trip() {
                cleanse_trip_edge(item, neighbour, excluding)?
            } else {
                cleanse_visit_edge(item, neighbour, excluding)?
            }
        };

        if let Some(decision) = decision {
            apply_move(list, db, &decision)?;
            moved.push(decision.sample_id);
        }
    }

    Ok(moved)
}

/// Trip↔trip: steal the neighbour's edge sample when it was classified as
/// this trip's mode and both edges sit on the same side of the mode-shift
/// speed.
fn cleanse_trip_edge(
    me: &TimelineItem,
    them: &TimelineItem,
    excluding: &HashSet<String>,
) -> Result<Option<MoveDecision>> {
    let my_type = me.activity_type();
    if my_type == them.activity_type() {
        return Ok(None);
    }
    let Some(my_type) = my_type else {
        return Ok(None);
    };

    let Some(my_edge) = me.edge_sample_toward(them)? else {
        return Ok(None);
    };
    let Some(their_edge) = them.edge_sample_toward(me)? else {
        return Ok(None);
    };
    let (Some(my_speed), Some(their_speed)) = (my_edge.speed, their_edge.speed) else {
        return Ok(None);
    };

    let my_slow = my_speed < MAX_MODE_SHIFT_SPEED;
    let their_slow = their_speed < MAX_MODE_SHIFT_SPEED;
    if my_slow != their_slow {
        return Ok(None);
    }

    if their_edge.classified_activity_type == Some(my_type) && !excluding.contains(&their_edge.id) {
        return Ok(Some(MoveDecision {
            sample_id: their_edge.id.clone(),
            from_id: them.base.id.clone(),
            to_id: me.base.id.clone(),
        }));
    }
    Ok(None)
}

/// Visit↔trip: absorb trip edges that fell inside the geofence, release
/// visit edges that wandered outside it.
fn cleanse_visit_edge(
    visit_item: &TimelineItem,
    trip: &TimelineItem,
    excluding: &HashSet<String>,
) -> Result<Option<MoveDecision>> {
    let Some(visit) = visit_item.visit.as_ref() else {
        return Ok(None);
    };

    let trip_edges = trip.edge_samples_toward(visit_item, 2)?;
    if trip_edges.len() == 2 {
        let both_inside = trip_edges
            .iter()
            .all(|s| s.coordinate().map_or(false, |c| visit.contains(c)));
        if both_inside && !excluding.contains(&trip_edges[0].id) {
            return Ok(Some(MoveDecision {
                sample_id: trip_edges[0].id.clone(),
                from_id: trip.base.id.clone(),
                to_id: visit_item.base.id.clone(),
            }));
        }
    }

    let my_edges = visit_item.edge_samples_toward(trip, 2)?;
    if my_edges.len() == 2 {
        let span = (my_edges[0].date - my_edges[1].date).num_milliseconds().abs() as f64 / 1000.0;
        if span > VISIT_EDGE_PAIR_MAX_DURATION {
            return Ok(None);
        }
    }

    if let Some(trip_nearest) = trip_edges.first() {
        let outside = trip_nearest
            .coordinate()
            .map_or(false, |c| !visit.contains(c));
        if outside {
            if let Some(my_edge) = my_edges.first() {
                if !excluding.contains(&my_edge.id) {
                    return Ok(Some(MoveDecision {
                        sample_id: my_edge.id.clone(),
                        from_id: visit_item.base.id.clone(),
                        to_id: trip.base.id.clone(),
                    }));
                }
            }
        }
    }
    Ok(None)
}

/// Reassign the sample in both the store and the in-memory window, and
/// re-mark both endpoints so their derived state recomputes on next
/// hydration.
fn apply_move(
    list: &mut TimelineLinkedList,
    db: &Database,
    decision: &MoveDecision,
) -> Result<()> {
    let missing = |id: &str| TimelineError::TopologyInvariant(format!("item {id} left the window mid-cleanse"));
    let from_range = list
        .get(&decision.from_id)
        .ok_or_else(|| missing(&decision.from_id))?
        .date_range();
    let to_range = list
        .get(&decision.to_id)
        .ok_or_else(|| missing(&decision.to_id))?
        .date_range();

    let mut sample = {
        let from = list
            .get_mut(&decision.from_id)
            .ok_or_else(|| missing(&decision.from_id))?;
        let samples = from.samples.as_mut().ok_or_else(|| {
            TimelineError::SamplesNotLoaded(decision.from_id.clone())
        })?;
        let index = samples
            .iter()
            .position(|s| s.id == decision.sample_id)
            .ok_or_else(|| missing(&decision.sample_id))?;
        from.base.samples_changed = true;
        samples.remove(index)
    };
    sample.timeline_item_id = Some(decision.to_id.clone());

    db.write(|scope| {
        queries::assign_sample(scope, &sample, &decision.to_id)?;
        queries::mark_samples_changed(scope, &decision.from_id, from_range)?;
        queries::mark_samples_changed(scope, &decision.to_id, to_range)?;
        Ok(())
    })?;

    let to = list
        .get_mut(&decision.to_id)
        .ok_or_else(|| missing(&decision.to_id))?;
    let samples = to
        .samples
        .as_mut()
        .ok_or_else(|| TimelineError::SamplesNotLoaded(decision.to_id.clone()))?;
    let insert_at = samples
        .iter()
        .position(|s| s.date > sample.date)
        .unwrap_or(samples.len());
    debug!(sample = %sample.id, from = %decision.from_id, to = %decision.to_id, "edge sample moved");
    samples.insert(insert_at, sample);
    to.base.samples_changed = true;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ActivityType, LocomotionSample, RecordingState, TimelineItemBase, TimelineItemTrip,
        TimelineItemVisit,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn trip(start: i64, end: i64, activity: ActivityType, speeds: &[f64]) -> TimelineItem {
        let base = TimelineItemBase::new(false, at(start), at(end));
        let step = ((end - start) as usize / speeds.len().max(1)).max(1) as i64;
        let samples = speeds
            .iter()
            .enumerate()
            .map(|(i, speed)| {
                LocomotionSample::new(at(start + i as i64 * step), RecordingState::Recording)
                    .with_coordinate(-37.8183 + i as f64 * 1e-5, 144.9671)
                    .with_speed(*speed)
                    .with_classified_type(activity)
                    .with_item(&base.id)
            })
            .collect();
        TimelineItem {
            trip: Some(TimelineItemTrip {
                item_id: base.id.clone(),
                distance: Some(50.0),
                speed: Some(1.0),
                classified_activity_type: Some(activity),
                confirmed_activity_type: None,
            }),
            visit: None,
            samples: Some(samples),
            base,
        }
    }

    #[test]
    fn trip_trip_steals_matching_edge() {
        // Walking trip then running trip, both edges dawdling below the
        // mode-shift speed, and running's edge sample classified walking.
        let mut walking = trip(0, 120, ActivityType::Walking, &[1.0, 0.8, 0.3]);
        let mut running = trip(120, 240, ActivityType::Running, &[0.3, 2.5, 3.0]);
        running.samples.as_mut().unwrap()[0].classified_activity_type = Some(ActivityType::Walking);
        walking.base.next_item_id = Some(running.base.id.clone());
        running.base.previous_item_id = Some(walking.base.id.clone());

        let stolen_id = running.samples.as_ref().unwrap()[0].id.clone();
        let decision = cleanse_trip_edge(&walking, &running, &HashSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(decision.sample_id, stolen_id);
        assert_eq!(decision.to_id, walking.base.id);

        // Excluded samples stay put.
        let excluding: HashSet<String> = [stolen_id].into_iter().collect();
        assert!(cleanse_trip_edge(&walking, &running, &excluding)
            .unwrap()
            .is_none());
    }

    #[test]
    fn trip_trip_requires_same_speed_side() {
        let walking = trip(0, 120, ActivityType::Walking, &[1.0, 0.8, 0.3]);
        // Their edge is fast while ours is slow: no steal.
        let mut running = trip(120, 240, ActivityType::Running, &[2.0, 2.5, 3.0]);
        running.samples.as_mut().unwrap()[0].classified_activity_type = Some(ActivityType::Walking);
        assert!(cleanse_trip_edge(&walking, &running, &HashSet::new())
            .unwrap()
            .is_none());
    }

    fn visit_with_edges(start: i64, end: i64) -> TimelineItem {
        let base = TimelineItemBase::new(true, at(start), at(end));
        let samples = (0..4)
            .map(|i| {
                LocomotionSample::new(at(start + i * 10), RecordingState::Recording)
                    .with_coordinate(-37.8183, 144.9671)
                    .with_item(&base.id)
            })
            .collect();
        TimelineItem {
            visit: Some(TimelineItemVisit {
                item_id: base.id.clone(),
                latitude: -37.8183,
                longitude: 144.9671,
                radius: 40.0,
            }),
            trip: None,
            samples: Some(samples),
            base,
        }
    }

    #[test]
    fn visit_absorbs_trip_edges_inside_fence() {
        let visit = visit_with_edges(0, 120);
        // Trip's two samples nearest the visit both sit on the center.
        let mut trip_item = trip(120, 240, ActivityType::Walking, &[1.0, 1.0, 1.0]);
        {
            let samples = trip_item.samples.as_mut().unwrap();
            samples[0].latitude = Some(-37.8183);
            samples[1].latitude = Some(-37.8183);
            samples[2].latitude = Some(-37.9000); // well outside
        }
        let first_id = trip_item.samples.as_ref().unwrap()[0].id.clone();

        let decision = cleanse_visit_edge(&visit, &trip_item, &HashSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(decision.sample_id, first_id);
        assert_eq!(decision.to_id, visit.base.id);
    }

    #[test]
    fn visit_releases_edge_outside_fence() {
        let mut visit = visit_with_edges(0, 120);
        // The visit's final sample strayed outside the fence, and the
        // trip's nearest edge is outside too.
        visit.samples.as_mut().unwrap()[3].latitude = Some(-37.9000);
        let strayed_id = visit.samples.as_ref().unwrap()[3].id.clone();
        let trip_item = trip(120, 240, ActivityType::Walking, &[1.0, 1.0, 1.0]);
        // trip() spaces samples ~1m apart near the fence center, so push
        // its near edge far away instead.
        let mut far_trip = trip_item.clone();
        {
            let samples = far_trip.samples.as_mut().unwrap();
            for s in samples.iter_mut() {
                s.latitude = Some(-37.9000);
            }
        }

        let decision = cleanse_visit_edge(&visit, &far_trip, &HashSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(decision.sample_id, strayed_id);
        assert_eq!(decision.to_id, far_trip.base.id);
    }

    #[test]
    fn visit_edge_pair_duration_cap_stops_cleansing() {
        // Visit samples 200s apart: the edge pair spans too long.
        let base = TimelineItemBase::new(true, at(0), at(400));
        let samples = vec![
            LocomotionSample::new(at(0), RecordingState::Recording)
                .with_coordinate(-37.8183, 144.9671)
                .with_item(&base.id),
            LocomotionSample::new(at(200), RecordingState::Recording)
                .with_coordinate(-37.8183, 144.9671)
                .with_item(&base.id),
        ];
        let visit = TimelineItem {
            visit: Some(TimelineItemVisit {
                item_id: base.id.clone(),
                latitude: -37.8183,
                longitude: 144.9671,
                radius: 40.0,
            }),
            trip: None,
            samples: Some(samples),
            base,
        };
        let mut far_trip = trip(400, 500, ActivityType::Walking, &[1.0, 1.0, 1.0]);
        for s in far_trip.samples.as_mut().unwrap() {
            s.latitude = Some(-37.9000);
        }
        assert!(cleanse_visit_edge(&visit, &far_trip, &HashSet::new())
            .unwrap()
            .is_none());
    }
}
