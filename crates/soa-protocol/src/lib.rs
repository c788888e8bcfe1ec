//! # soa-protocol
//!
//! Protocol action graphs and visit window arithmetic for clinical-trial
//! schedules of activities.
//!
//! This crate provides:
//! - **Protocol Graph Builder**: resolve a protocol's declared actions into
//!   [`VisitPlan`]s and identify the single index (anchor) visit
//! - **Window Calculator**: derive each visit's expected calendar window from
//!   the anchor date
//!
//! ## Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use soa_protocol::{build, compute_window, RawAction, RelatedAction, Relationship};
//!
//! let actions = vec![
//!     RawAction::new("PlanDefinition/BASELINE").with_action_id("a1"),
//!     RawAction::new("PlanDefinition/WEEK2")
//!         .with_related(RelatedAction::days("a1", Relationship::After, Some(14), Some(21))),
//! ];
//! let graph = build(&actions).unwrap();
//! assert_eq!(graph.index_visit().unwrap().visit_id, "PlanDefinition/BASELINE");
//!
//! let anchor = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
//! let window = compute_window(anchor, graph.get("PlanDefinition/WEEK2").unwrap());
//! assert_eq!(window.to_string(), "date=ge2024-01-24&date=le2024-01-31");
//! ```
//!
//! ## Window Arithmetic
//!
//! | Relationship | Lower bound (≥) | Upper bound (≤) |
//! |--------------|-----------------|-----------------|
//! | `After` | anchor + low | anchor + high |
//! | `Before` | anchor − high | anchor − low |
//!
//! A missing offset leaves that side of the window open. A plan with no
//! offsets at all yields [`EvidenceWindow::Unconstrained`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod action;
mod error;
mod graph;
mod window;

pub use action::{DurationUnit, Offset, ProtocolDefinition, RawAction, RelatedAction, Relationship};
pub use error::{ProtocolError, ProtocolResult};
pub use graph::{BuildOptions, ProtocolGraph, UnitPolicy, VisitPlan, MAX_OFFSET_DAYS};
pub use window::{compute_window, DatePredicate, EvidenceWindow, ExactSource};

/// Builds a protocol graph from declared actions with default options.
pub fn build(actions: &[RawAction]) -> ProtocolResult<ProtocolGraph> {
    ProtocolGraph::build(actions)
}
