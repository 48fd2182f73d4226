//! Timeline reconstruction: the linked-list window, consumption scoring,
//! merge enumeration and execution, edge cleansing, and the processor
//! that drives them to convergence.

pub mod candidates;
pub mod cleansing;
pub mod linked_list;
pub mod merge;
pub mod processor;
pub mod scoring;

pub use candidates::{collect_candidates, MergeCandidate, MAX_POTENTIAL_MERGES_IN_PROCESSING_LOOP};
pub use cleansing::{sanitise_edges, MAX_EDGE_STEALS, MAX_MODE_SHIFT_SPEED};
pub use linked_list::{TimelineLinkedList, MAX_PROCESSING_LIST_SIZE};
pub use merge::{execute_merge, MergeResult};
pub use processor::TimelineProcessor;
pub use scoring::{consumption_score, ConsumptionScore};
