//! Seams to the external collaborators this core consumes.
//!
//! The composition root threads these in explicitly; the core never
//! reaches for globals.

use crate::models::{ActivityType, TimelineItem};

/// Whether the process is in the foreground-active state. Segments only
/// trigger reprocessing while active.
pub trait ForegroundState: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Identity of the item the recorder is currently appending to. The
/// active recorder is the sole authority on in-flight items.
pub trait RecorderHandle: Send + Sync {
    fn current_item_id(&self) -> Option<String>;
}

/// Optional classifier-probability plug point for trip-consumes-trip
/// scoring. Without one installed, that path scores Impossible.
pub trait TripClassifier: Send + Sync {
    /// Probability in `0..=1` that the item's samples match the given
    /// activity type, or None when the classifier has no opinion.
    fn probability(&self, item: &TimelineItem, activity_type: ActivityType) -> Option<f64>;
}
