//! Signal decoding and rule evaluation.
//!
//! Pure logic with no I/O: the main loop feeds frames in, and fired
//! actions leave through [`ActionDelegate`](crate::app::ports::ActionDelegate).

pub mod bitfield;
pub mod definition;
pub mod graph;
pub mod model;

pub use definition::{RulesetDef, WatchDef};
pub use graph::RuleGraph;
