//! # soa-fhir-bundle
//!
//! A FHIR `Bundle` data source for [`soa_window_resolver`].
//!
//! [`BundleGateway`] indexes a bundle (from a string, a parsed value or a
//! file) and implements [`ClinicalDataGateway`](soa_window_resolver::ClinicalDataGateway)
//! over it, so protocols can be resolved against exported study data
//! without a live FHIR server.
//!
//! ## Resources read
//!
//! | Resource | Used for |
//! |----------|----------|
//! | `ResearchStudy` | Study lookup by id or identifier; `protocol` → PlanDefinition |
//! | `PlanDefinition` | Protocol actions and related-action offsets |
//! | `ResearchSubject` | Enrolment (`study`) and patient identity (`individual`) |
//! | `CarePlan` / `ServiceRequest` | Linking a visit definition to an encounter |
//! | `Encounter` | Visit dates (`period`) |
//! | `Observation`, `Procedure`, `AdverseEvent`, `MedicationStatement` | Corroborating records |
//!
//! Entries that cannot be interpreted are logged and skipped. A study's
//! protocol PlanDefinition, however, must convert cleanly or loading fails.
//!
//! ## Usage
//!
//! ```ignore
//! use soa_fhir_bundle::BundleGateway;
//! use soa_window_resolver::{ResolverConfig, StudyResolver};
//!
//! let gateway = BundleGateway::from_path("lzzt-bundle.json")?;
//! let run = StudyResolver::new(&gateway, ResolverConfig::default()).resolve_study("H2Q-MC-LZZT")?;
//! println!("{}", run.summary());
//! ```

#![warn(missing_docs)]

mod error;
mod gateway;
mod model;
mod plan_definition;

pub use error::{BundleError, BundleResult};
pub use gateway::{BundleGateway, BundleStats};
pub use plan_definition::parse_plan_definition;
