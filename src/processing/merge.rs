//! Merge execution: one consumption, one transaction.
//!
//! Preconditions are re-checked against fresh rows inside the write scope
//! because the candidate was scored against a snapshot that may have
//! aged. On success the keeper has absorbed the deadman's (and
//! betweener's) samples and link boundary; the killed items survive only
//! as tombstoned rows.

use tracing::{debug, error};

use crate::error::{Result, TimelineError};
use crate::models::TimelineItemBase;
use crate::processing::candidates::MergeCandidate;
use crate::store::{queries, Database, WriteScope};

/// Outcome of an executed merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub kept: String,
    pub killed: Vec<String>,
}

/// Execute a scored candidate. Fails with `TopologyInvariant` when the
/// linked-list shape no longer matches either canonical orientation.
pub fn execute_merge(db: &Database, candidate: &MergeCandidate) -> Result<MergeResult> {
    db.write(|scope| execute_in_scope(scope, candidate))
}

fn fetch_live(scope: &WriteScope<'_>, id: &str, role: &str) -> Result<TimelineItemBase> {
    match queries::get_base(scope.conn(), id)? {
        Some(base) if !base.deleted => Ok(base),
        Some(_) => Err(TimelineError::TopologyInvariant(format!(
            "{role} {id} was deleted before the merge transaction"
        ))),
        None => Err(TimelineError::TopologyInvariant(format!(
            "{role} {id} disappeared before the merge transaction"
        ))),
    }
}

fn execute_in_scope(scope: &mut WriteScope<'_>, candidate: &MergeCandidate) -> Result<MergeResult> {
    let mut keeper = fetch_live(scope, &candidate.keeper_id, "keeper")?;
    let mut deadman = fetch_live(scope, &candidate.deadman_id, "deadman")?;
    let mut betweener = candidate
        .betweener_id
        .as_deref()
        .map(|id| fetch_live(scope, id, "betweener"))
        .transpose()?;

    // The deadman sits on the keeper's previous side iff the chain walks
    // deadman (→ betweener) → keeper.
    let deadman_is_previous = match &betweener {
        None => {
            if keeper.next_item_id.as_deref() == Some(deadman.id.as_str()) {
                false
            } else if deadman.next_item_id.as_deref() == Some(keeper.id.as_str()) {
                true
            } else {
                let e = TimelineError::TopologyInvariant(format!(
                    "items {} and {} are no longer adjacent",
                    keeper.id, deadman.id
                ));
                error!(error = %e, "aborting merge");
                return Err(e);
            }
        }
        Some(mid) => {
            if keeper.next_item_id.as_deref() == Some(mid.id.as_str())
                && mid.next_item_id.as_deref() == Some(deadman.id.as_str())
            {
                false
            } else if deadman.next_item_id.as_deref() == Some(mid.id.as_str())
                && mid.next_item_id.as_deref() == Some(keeper.id.as_str())
            {
                true
            } else {
                let e = TimelineError::TopologyInvariant(format!(
                    "items {}, {}, {} are no longer a chain",
                    keeper.id, mid.id, deadman.id
                ));
                error!(error = %e, "aborting merge");
                return Err(e);
            }
        }
    };

    // Splice: the keeper inherits the deadman's outward link.
    if deadman_is_previous {
        keeper.previous_item_id = deadman.previous_item_id.clone();
    } else {
        keeper.next_item_id = deadman.next_item_id.clone();
    }

    // Collect the samples to move and tombstone the losers. An item that
    // still holds disabled samples is only disabled, never deleted, so
    // those samples keep a live owner.
    let mut samples_to_move = Vec::new();
    for base in betweener.iter_mut().chain(std::iter::once(&mut deadman)) {
        let samples = queries::samples_for_item(scope.conn(), &base.id)?;
        let any_disabled = samples.iter().any(|s| s.disabled);
        samples_to_move.extend(samples.into_iter().filter(|s| !s.disabled));
        if any_disabled {
            base.disabled = true;
        } else {
            base.deleted = true;
        }
        base.previous_item_id = None;
        base.next_item_id = None;
    }

    if !samples_to_move.is_empty() {
        keeper.samples_changed = true;
    }

    queries::save_base(scope, &keeper)?;
    if let Some(mid) = &betweener {
        queries::save_base(scope, mid)?;
    }
    queries::save_base(scope, &deadman)?;

    for sample in &samples_to_move {
        queries::assign_sample(scope, sample, &keeper.id)?;
    }

    let killed: Vec<String> = std::iter::once(deadman.id.clone())
        .chain(betweener.as_ref().map(|b| b.id.clone()))
        .collect();
    debug!(kept = %keeper.id, killed = ?killed, moved = samples_to_move.len(), "merged");

    Ok(MergeResult {
        kept: keeper.id,
        killed,
    })
}
