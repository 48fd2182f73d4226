//! Consumption scoring: how well a consumer item would absorb a consumee.
//!
//! Evaluated as a decision cascade, first match wins. The lattice is the
//! heart of merge ranking; scores only ever compare, they never persist.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry;
use crate::hooks::TripClassifier;
use crate::models::TimelineItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConsumptionScore {
    Impossible = 0,
    VeryLow = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Perfect = 5,
}

/// Map a classifier probability onto the lattice.
fn score_for_probability(probability: f64) -> ConsumptionScore {
    if probability >= 0.75 {
        ConsumptionScore::Perfect
    } else if probability >= 0.50 {
        ConsumptionScore::High
    } else if probability >= 0.25 {
        ConsumptionScore::Medium
    } else if probability >= 0.10 {
        ConsumptionScore::Low
    } else {
        ConsumptionScore::VeryLow
    }
}

/// Score `consumer` absorbing `consumee`. Both items must be hydrated.
pub fn consumption_score(
    consumer: &TimelineItem,
    consumee: &TimelineItem,
    classifier: Option<&dyn TripClassifier>,
) -> Result<ConsumptionScore> {
    use ConsumptionScore::*;

    // An empty consumee costs nothing to absorb.
    if consumee.samples()?.is_empty() {
        return Ok(Perfect);
    }
    if consumer.samples()?.is_empty()
        || consumer.base.deleted
        || consumer.base.disabled
        || consumee.base.disabled
        || consumer.base.source != consumee.base.source
    {
        return Ok(Impossible);
    }

    // Data gaps only merge with each other.
    if consumer.is_data_gap()? {
        return Ok(if consumee.is_data_gap()? { Perfect } else { Impossible });
    }
    if consumee.is_data_gap()? {
        return Ok(if consumee.is_valid()? { Impossible } else { Medium });
    }

    // Nolos only merge with nolos, except as invalid consumees.
    if consumer.is_nolo()? {
        return Ok(if consumee.is_nolo()? { Perfect } else { Impossible });
    }
    if consumee.is_nolo()? && !consumee.is_valid()? {
        return Ok(Medium);
    }

    if !geometry::is_within_mergeable_distance(consumer, consumee)? {
        return Ok(Impossible);
    }

    if consumer.is_visit() {
        visit_consumes(consumer, consumee)
    } else {
        trip_consumes(consumer, consumee, classifier)
    }
}

fn trip_consumes(
    consumer: &TimelineItem,
    consumee: &TimelineItem,
    classifier: Option<&dyn TripClassifier>,
) -> Result<ConsumptionScore> {
    use ConsumptionScore::*;

    if !consumer.is_valid()? {
        return Ok(if consumee.is_valid()? { Impossible } else { VeryLow });
    }

    if consumee.is_visit() {
        // Keeper visits are untouchable by trips.
        if consumee.is_worth_keeping()? {
            return Ok(Impossible);
        }
        let consumee_valid = consumee.is_valid()?;
        return Ok(if consumer.is_worth_keeping()? {
            if consumee_valid { Low } else { Medium }
        } else if consumee_valid {
            VeryLow
        } else {
            Low
        });
    }

    // Trip consumes trip.
    let my_type = consumer.activity_type();
    let their_type = consumee.activity_type();
    if my_type.is_none() && their_type.is_none() {
        return Ok(Medium);
    }
    if my_type.is_some() && my_type == their_type {
        return Ok(Perfect);
    }
    if consumee.is_worth_keeping()? {
        return Ok(Impossible);
    }
    let Some(mine) = my_type else {
        return Ok(Impossible);
    };
    if let Some(classifier) = classifier {
        if let Some(probability) = classifier.probability(consumee, mine) {
            return Ok(score_for_probability(probability));
        }
    }
    Ok(Impossible)
}

fn visit_consumes(consumer: &TimelineItem, consumee: &TimelineItem) -> Result<ConsumptionScore> {
    use ConsumptionScore::*;

    if consumee.is_visit() {
        // Overlapping visits collapse; the longer one wins, the consumer
        // on a tie.
        let overlapping = geometry::time_interval(&consumer.date_range(), &consumee.date_range())
            < 0.0;
        if overlapping {
            return Ok(if consumer.duration() >= consumee.duration() { Perfect } else { High });
        }
        return Ok(Impossible);
    }

    // Visit consumes trip: only a valid visit eating an invalid trip, and
    // only convincingly when every consumee sample sits inside the fence.
    if consumer.is_valid()? && !consumee.is_valid()? {
        let pct_inside = pct_samples_inside(consumer, consumee)?;
        return Ok(if (pct_inside * 10.0).floor() as i64 == 10 { Low } else { VeryLow });
    }
    Ok(Impossible)
}

/// Fraction of the consumee's located samples inside the consumer's
/// geofence.
fn pct_samples_inside(visit_item: &TimelineItem, consumee: &TimelineItem) -> Result<f64> {
    let Some(visit) = visit_item.visit.as_ref() else {
        return Ok(0.0);
    };
    let located: Vec<_> = consumee
        .samples()?
        .iter()
        .filter_map(|s| s.coordinate())
        .collect();
    if located.is_empty() {
        return Ok(0.0);
    }
    let inside = located.iter().filter(|point| visit.contains(**point)).count();
    Ok(inside as f64 / located.len() as f64)
}
