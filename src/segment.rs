//! Live timeline segments.
//!
//! A segment watches a date-range window: it subscribes to the change
//! bus, debounces intersecting events with a trailing-edge timer,
//! refetches and rehydrates the window's items, republishes them on a
//! watch channel, and optionally hands them to the processor. Dropping
//! the segment cancels its observer task; an in-flight debounce may be
//! lost with it, which is fine because the next write re-raises the event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::hooks::{ForegroundState, RecorderHandle};
use crate::models::{DateInterval, LocomotionSample, TimelineItem};
use crate::processing::TimelineProcessor;
use crate::store::{queries, Database};

/// Trailing-edge debounce between a change notification and the refetch
/// it schedules. The latest event wins.
pub const REFETCH_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct TimelineSegment {
    date_range: DateInterval,
    items: watch::Receiver<Vec<TimelineItem>>,
    task: JoinHandle<()>,
}

impl TimelineSegment {
    pub fn new(
        db: Database,
        date_range: DateInterval,
        should_reprocess_on_update: bool,
        foreground: Arc<dyn ForegroundState>,
        recorder: Arc<dyn RecorderHandle>,
        processor: Arc<Mutex<TimelineProcessor>>,
    ) -> Self {
        let (items_tx, items) = watch::channel(Vec::new());
        let observer = SegmentObserver {
            db,
            date_range,
            should_reprocess_on_update,
            foreground,
            recorder,
            processor,
            items_tx,
            held_samples: HashMap::new(),
        };
        let task = tokio::spawn(observer.run());
        Self {
            date_range,
            items,
            task,
        }
    }

    #[inline]
    pub fn date_range(&self) -> DateInterval {
        self.date_range
    }

    /// The published item list; `changed()` on the receiver signals each
    /// republication.
    pub fn items(&self) -> watch::Receiver<Vec<TimelineItem>> {
        self.items.clone()
    }
}

impl Drop for TimelineSegment {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SegmentObserver {
    db: Database,
    date_range: DateInterval,
    should_reprocess_on_update: bool,
    foreground: Arc<dyn ForegroundState>,
    recorder: Arc<dyn RecorderHandle>,
    processor: Arc<Mutex<TimelineProcessor>>,
    items_tx: watch::Sender<Vec<TimelineItem>>,
    /// Samples held from the previous fetch, reused while an item's
    /// `samples_changed` flag stays clear.
    held_samples: HashMap<String, Vec<LocomotionSample>>,
}

/// Parking spot for the debounce timer while nothing is pending.
fn park() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

impl SegmentObserver {
    async fn run(mut self) {
        let mut changes = self.db.subscribe();
        self.refetch().await;

        let sleep = sleep_until(park());
        tokio::pin!(sleep);
        let mut pending = false;

        loop {
            tokio::select! {
                received = changes.recv() => match received {
                    Ok(range) if range.intersects(&self.date_range) => {
                        pending = true;
                        sleep.as_mut().reset(Instant::now() + REFETCH_DEBOUNCE);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Events were dropped; assume one was ours.
                        warn!(skipped, "change stream lagged, scheduling refetch");
                        pending = true;
                        sleep.as_mut().reset(Instant::now() + REFETCH_DEBOUNCE);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                () = &mut sleep, if pending => {
                    pending = false;
                    sleep.as_mut().reset(park());
                    self.refetch().await;
                }
            }
        }
    }

    async fn refetch(&mut self) {
        let fetched = match self
            .db
            .read(|conn| queries::items_overlapping(conn, &self.date_range))
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "segment refetch failed");
                return;
            }
        };

        let mut items = Vec::with_capacity(fetched.len());
        for mut item in fetched {
            if !item.base.samples_changed {
                if let Some(held) = self.held_samples.get(item.id()) {
                    item.samples = Some(held.clone());
                }
            }
            if item.samples.is_none() {
                if let Err(e) = queries::hydrate_item(&self.db, &mut item) {
                    warn!(error = %e, item = %item.id(), "sample hydration failed");
                    continue;
                }
            }
            items.push(item);
        }

        self.held_samples = items
            .iter()
            .map(|item| {
                (
                    item.id().to_string(),
                    item.samples.clone().unwrap_or_default(),
                )
            })
            .collect();

        debug!(count = items.len(), "segment republishing");
        let _ = self.items_tx.send(items.clone());

        if self.should_reprocess_on_update {
            self.maybe_reprocess(items).await;
        }
    }

    async fn maybe_reprocess(&self, items: Vec<TimelineItem>) {
        if !self.foreground.is_active() {
            return;
        }
        // The recorder owns in-flight items: only reprocess when the
        // current item is outside this window or already worth keeping.
        if let Some(current_id) = self.recorder.current_item_id() {
            if let Some(current) = items.iter().find(|item| item.id() == current_id) {
                match current.is_worth_keeping() {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(item = %current_id, "skipping reprocess: item still recording");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "reprocess gate failed");
                        return;
                    }
                }
            }
        }
        let mut processor = self.processor.lock().await;
        if let Err(e) = processor.process_items(items) {
            warn!(error = %e, "segment reprocess failed");
        }
    }
}
