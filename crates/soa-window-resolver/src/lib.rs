//! # soa-window-resolver
//!
//! Per-subject visit window resolution for clinical-trial protocols.
//!
//! This crate resolves each planned visit of a protocol for one study subject
//! against any clinical data source that implements [`ClinicalDataGateway`],
//! and classifies the evidence that the visit took place.
//!
//! ## Key Features
//!
//! - **Gateway-agnostic** - bring your own FHIR client or store
//! - **At-most-once lookups** - per-resolver memoization of subject and
//!   encounter lookups
//! - **Exact-date precedence** - a point-in-time encounter overrides the
//!   predicted range
//! - **Batch resolution** - resolve a whole study with per-subject failures
//!   isolated, optionally in parallel
//!
//! ## Quick Start
//!
//! ```ignore
//! use soa_window_resolver::{MatchTier, VisitResolver};
//!
//! let resolver = VisitResolver::new(&gateway, "H2Q-MC-LZZT");
//! let protocol = resolver.load_protocol()?;
//! let resolution = resolver.resolve("01-701-1015", &protocol)?;
//!
//! for outcome in resolution.iter() {
//!     match outcome.tier {
//!         Some(MatchTier::Green) => println!("{} attended on time", outcome.visit_id),
//!         Some(tier) => println!("{} {tier} {}", outcome.visit_id, outcome.datequery_description()),
//!         None => println!("{} skipped", outcome.visit_id),
//!     }
//! }
//! ```
//!
//! ## With Configuration
//!
//! ```ignore
//! use soa_window_resolver::{MissingEncounterPolicy, ResolverConfig, StudyResolver, UnitPolicy};
//!
//! let config = ResolverConfig::builder()
//!     .with_unit_policy(UnitPolicy::ApproximateAsDays)
//!     .with_missing_encounter_policy(MissingEncounterPolicy::PredictWindow)
//!     .with_parallel(true)
//!     .build();
//!
//! let run = StudyResolver::new(&gateway, config).resolve_study("H2Q-MC-LZZT")?;
//! println!("{}", run.summary());
//! ```
//!
//! ## Tiers
//!
//! | Window | Corroborating records | Tier |
//! |--------|-----------------------|------|
//! | Exact date | > 0 | GREEN |
//! | Predicted range | > 0 | ORANGE |
//! | Any | 0 | RED |
//! | Unconstrained | not queried | RED |
//! | Skipped | not queried | none |
//!
//! ## Feature Flags
//!
//! - `parallel` - Resolves study subjects on the rayon thread pool
//! - `serde` - Serialize/deserialize outcome types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    soa-window-resolver                       │
//! │                                                              │
//! │  VisitResolver                                               │
//! │  ├── look up subject            (cached, gateway)           │
//! │  ├── anchor = index encounter   (cached, gateway)           │
//! │  ├── per visit: own encounter → exact date or window        │
//! │  ├── count corroborating records per kind                   │
//! │  └── return SubjectResolution with tiers and stats          │
//! │                                                              │
//! │  Dependencies:                                               │
//! │  └── soa-protocol - protocol graph and window arithmetic    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod config;
mod error;
mod resolver;
mod result;
mod study;
mod traits;

// Public re-exports
pub use cache::{LookupCache, LookupKey, LookupStats};
pub use config::{MissingEncounterPolicy, ResolverConfig, ResolverConfigBuilder};
pub use error::{GatewayError, GatewayResult, ResolutionStage, ResolveError, ResolveResult};
pub use resolver::VisitResolver;
pub use result::{MatchTier, ResolutionStats, SubjectResolution, TierSummary, VisitOutcome};
pub use study::{StudyResolution, StudyResolver, SubjectReport};
pub use traits::{ClinicalDataGateway, Encounter, Period, ResourceKind, Subject};

// Re-export commonly used types from dependencies for convenience
pub use soa_protocol::{
    DatePredicate, EvidenceWindow, ExactSource, ProtocolDefinition, ProtocolGraph, UnitPolicy,
};
