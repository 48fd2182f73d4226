//! Trailkeeper: timeline reconstruction core for a mobile
//! location-recording library.
//!
//! Persisted streams of timestamped location samples, organised into a
//! doubly-linked sequence of visits and trips, are iteratively cleansed,
//! scored, and merged into a stable non-overlapping history. Location
//! acquisition and activity classification live upstream; this crate owns
//! the item model, the merge machinery, and the segment observers that
//! keep live windows current.

pub mod config;
pub mod error;
pub mod geometry;
pub mod hooks;
pub mod models;
pub mod processing;
pub mod segment;
pub mod store;

pub use config::Config;
pub use error::{Result, TimelineError};
pub use hooks::{ForegroundState, RecorderHandle, TripClassifier};
pub use models::{
    ActivityType, DateInterval, LocomotionSample, RecordingState, TimelineItem, TimelineItemBase,
    TimelineItemTrip, TimelineItemVisit,
};
pub use processing::{ConsumptionScore, MergeResult, TimelineProcessor};
pub use segment::TimelineSegment;
pub use store::Database;
