//! Merge candidate enumeration.
//!
//! Three shapes per window item: adjacent pairs, betweeners, and bridges.
//! Candidates land in a set (dedup by keeper/deadman/betweener/start
//! date), get scored on insertion, and come back ranked best-first.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::Result;
use crate::hooks::TripClassifier;
use crate::models::TimelineItem;
use crate::processing::linked_list::TimelineLinkedList;
use crate::processing::scoring::{consumption_score, ConsumptionScore};

/// Collection stops early once this many candidates exist and at least
/// one of them is executable.
pub const MAX_POTENTIAL_MERGES_IN_PROCESSING_LOOP: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    pub keeper_id: String,
    pub betweener_id: Option<String>,
    pub deadman_id: String,
    pub score: ConsumptionScore,
}

type CandidateKey = (String, String, Option<String>, DateTime<Utc>);

fn push_candidate(
    classifier: Option<&dyn TripClassifier>,
    seen: &mut HashSet<CandidateKey>,
    out: &mut Vec<MergeCandidate>,
    keeper: &TimelineItem,
    betweener: Option<&TimelineItem>,
    deadman: &TimelineItem,
) -> Result<()> {
    let key = (
        keeper.id().to_string(),
        deadman.id().to_string(),
        betweener.map(|b| b.id().to_string()),
        keeper.base.start_date,
    );
    if !seen.insert(key) {
        return Ok(());
    }
    let score = consumption_score(keeper, deadman, classifier)?;
    out.push(MergeCandidate {
        keeper_id: keeper.id().to_string(),
        betweener_id: betweener.map(|b| b.id().to_string()),
        deadman_id: deadman.id().to_string(),
        score,
    });
    Ok(())
}

/// Enumerate and rank all plausible merges in the window. The returned
/// list is sorted by score descending; insertion order breaks ties. A
/// leading Impossible (or an empty list) means there is nothing to merge.
pub fn collect_candidates(
    list: &TimelineLinkedList,
    classifier: Option<&dyn TripClassifier>,
) -> Result<Vec<MergeCandidate>> {
    let mut seen: HashSet<CandidateKey> = HashSet::new();
    let mut out: Vec<MergeCandidate> = Vec::new();

    for item_id in list.item_ids_ordered() {
        let Some(item) = list.get(&item_id) else { continue };
        let previous = list.previous_item(&item_id);
        let next = list.next_item(&item_id);

        // Adjacent: both directions, both role assignments.
        for neighbour in [previous, next].into_iter().flatten() {
            push_candidate(classifier, &mut seen, &mut out, item, None, neighbour)?;
            push_candidate(classifier, &mut seen, &mut out, neighbour, None, item)?;
        }

        if let (Some(prev), Some(next)) = (previous, next) {
            let item_keepness = item.keepness_score()?;

            // Betweener: the middle of a contiguous chain is out-kept on
            // both sides, and neither end is a data gap.
            if item_keepness < prev.keepness_score()?
                && next.keepness_score()? > item_keepness
                && !prev.is_data_gap()?
                && !next.is_data_gap()?
            {
                push_candidate(classifier, &mut seen, &mut out, prev, Some(item), next)?;
                push_candidate(classifier, &mut seen, &mut out, next, Some(item), prev)?;
            }

            // Bridge: both neighbours strictly out-keep the middle and all
            // three share a source.
            if prev.keepness_score()? > item_keepness
                && next.keepness_score()? > item_keepness
                && prev.base.source == item.base.source
                && next.base.source == item.base.source
            {
                push_candidate(classifier, &mut seen, &mut out, prev, Some(item), next)?;
                push_candidate(classifier, &mut seen, &mut out, next, Some(item), prev)?;
            }
        }

        if out.len() >= MAX_POTENTIAL_MERGES_IN_PROCESSING_LOOP
            && out.iter().any(|c| c.score != ConsumptionScore::Impossible)
        {
            break;
        }
    }

    // Stable sort keeps insertion order across equal scores.
    out.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(out)
}
