//! The timeline processor: the convergent rewriting loop.
//!
//! One call cleanses the window to fixpoint, collects and ranks merge
//! candidates, and executes the single best one; the driver then recurses
//! on the surviving item until nothing merges. Callers serialise passes
//! behind one `tokio::sync::Mutex` so that no two processor operations
//! run concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hooks::{RecorderHandle, TripClassifier};
use crate::models::TimelineItem;
use crate::processing::candidates::collect_candidates;
use crate::processing::cleansing::sanitise_edges;
use crate::processing::linked_list::TimelineLinkedList;
use crate::processing::merge::{execute_merge, MergeResult};
use crate::processing::scoring::ConsumptionScore;
use crate::store::Database;

pub struct TimelineProcessor {
    db: Database,
    classifier: Option<Arc<dyn TripClassifier>>,
    recorder: Option<Arc<dyn RecorderHandle>>,
    /// Samples moved by the previous processing call, excluded from this
    /// one to stop edge ping-pong. Overwritten on every call.
    already_moved: HashSet<String>,
}

impl TimelineProcessor {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            classifier: None,
            recorder: None,
            already_moved: HashSet::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TripClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RecorderHandle>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Recursive merge driver: keep processing windows seeded on the
    /// surviving item until no merge remains. Persistence failures quiesce
    /// here; the next change event re-triggers processing.
    pub fn process_from(&mut self, item_id: &str) -> Result<()> {
        let mut current = item_id.to_string();
        loop {
            let mut list = match TimelineLinkedList::load(&self.db, &current) {
                Ok(Some(list)) => list,
                Ok(None) => return Ok(()),
                Err(e) if e.is_persistence() => {
                    warn!(error = %e, item = %current, "processing quiesced");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            match self.process(&mut list) {
                Ok(Some(result)) => current = result.kept,
                Ok(None) => return Ok(()),
                Err(e) if e.is_persistence() => {
                    warn!(error = %e, item = %current, "processing quiesced");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One processing pass over a window: cleanse, collect, execute the
    /// best merge. Returns None when nothing merged.
    pub fn process(&mut self, list: &mut TimelineLinkedList) -> Result<Option<MergeResult>> {
        if list.is_empty() {
            return Ok(None);
        }

        // The active recorder is the sole authority on in-flight items:
        // leave the window alone while it holds one that is not yet worth
        // keeping.
        if let Some(recorder) = &self.recorder {
            if let Some(current_id) = recorder.current_item_id() {
                if let Some(current) = list.get(&current_id) {
                    if !current.is_worth_keeping()? {
                        debug!(item = %current_id, "skipping: current item still recording");
                        return Ok(None);
                    }
                }
            }
        }

        let moved = sanitise_edges(list, &self.db, &self.already_moved)?;
        self.already_moved = moved;

        let candidates = collect_candidates(list, self.classifier.as_deref())?;
        let Some(best) = candidates.first() else {
            return Ok(None);
        };
        if best.score == ConsumptionScore::Impossible {
            return Ok(None);
        }

        let result = execute_merge(&self.db, best)?;
        info!(kept = %result.kept, killed = ?result.killed, score = ?best.score, "merge executed");
        Ok(Some(result))
    }

    /// Process a set of already-hydrated working items (segment
    /// reprocessing), then run the recursive driver on any survivor.
    pub fn process_items(&mut self, items: Vec<TimelineItem>) -> Result<()> {
        let mut list = TimelineLinkedList::from_items(items);
        match self.process(&mut list) {
            Ok(Some(result)) => self.process_from(&result.kept),
            Ok(None) => Ok(()),
            Err(e) if e.is_persistence() => {
                warn!(error = %e, "processing quiesced");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
