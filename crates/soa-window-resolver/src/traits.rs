//! The clinical data gateway consumed by the resolver.
//!
//! This module defines the [`ClinicalDataGateway`] trait that must be
//! implemented by any clinical data source the resolver queries.
//!
//! # Architecture Note
//!
//! The resolver never owns a transport. The gateway is constructed by the
//! caller and passed in by reference, so its lifecycle (sessions, retries,
//! credentials) stays with the caller.
//!
//! # Example: Implementing ClinicalDataGateway
//!
//! ```ignore
//! use soa_window_resolver::{ClinicalDataGateway, Encounter, GatewayResult, ResourceKind, Subject};
//! use soa_protocol::{DatePredicate, ProtocolDefinition};
//!
//! impl ClinicalDataGateway for MyFhirClient {
//!     fn find_protocol_definition(&self, study_id: &str) -> GatewayResult<Option<ProtocolDefinition>> {
//!         self.plan_definition_for(study_id)
//!     }
//!
//!     fn find_subject(&self, subject_id: &str, study_id: &str) -> GatewayResult<Option<Subject>> {
//!         self.research_subject(subject_id, study_id)
//!     }
//!
//!     fn find_encounter_for_visit(&self, subject: &Subject, visit_id: &str) -> GatewayResult<Option<Encounter>> {
//!         self.encounter_for(subject, visit_id)
//!     }
//!
//!     fn count_clinical_records(
//!         &self,
//!         subject: &Subject,
//!         kind: ResourceKind,
//!         predicate: &DatePredicate,
//!     ) -> GatewayResult<u64> {
//!         self.search_total(kind.resource_type(), &subject.patient_reference, predicate)
//!     }
//! }
//! ```

use std::fmt;

use chrono::NaiveDateTime;
use soa_protocol::{DatePredicate, ProtocolDefinition};

use crate::error::GatewayResult;

// =============================================================================
// Subjects and encounters
// =============================================================================

/// A trial participant and its link to the patient identity used for queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subject {
    /// Subject identifier within the study.
    pub subject_id: String,
    /// The study the subject is enrolled in.
    pub study_id: String,
    /// Reference to the patient record (e.g. `Patient/123`).
    pub patient_reference: String,
}

impl Subject {
    /// Creates a subject.
    pub fn new(
        subject_id: impl Into<String>,
        study_id: impl Into<String>,
        patient_reference: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            study_id: study_id.into(),
            patient_reference: patient_reference.into(),
        }
    }
}

/// The time period of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Period {
    /// Start of the encounter.
    pub start: NaiveDateTime,
    /// End of the encounter, if recorded.
    pub end: Option<NaiveDateTime>,
}

impl Period {
    /// Creates a period.
    pub fn new(start: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        Self { start, end }
    }

    /// Creates a period whose start equals its end.
    pub fn instant(at: NaiveDateTime) -> Self {
        Self::new(at, Some(at))
    }

    /// Returns true if the encounter is a single point in time.
    pub fn is_point_in_time(&self) -> bool {
        self.end == Some(self.start)
    }
}

/// A real-world encounter recorded for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Encounter {
    /// Encounter identifier.
    pub id: String,
    /// When the encounter took place.
    pub period: Period,
}

impl Encounter {
    /// Creates an encounter.
    pub fn new(id: impl Into<String>, period: Period) -> Self {
        Self {
            id: id.into(),
            period,
        }
    }
}

// =============================================================================
// Corroborating record kinds
// =============================================================================

/// Kinds of clinical record counted as evidence that a visit took place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceKind {
    /// Observations (vitals, labs, questionnaires).
    Observation,
    /// Procedures.
    Procedure,
    /// Adverse events.
    AdverseEvent,
    /// Medication statements.
    MedicationStatement,
    /// Encounters themselves, for data sources without visit linkage.
    Encounter,
}

impl ResourceKind {
    /// The default corroborating set.
    pub const DEFAULT: [ResourceKind; 4] = [
        ResourceKind::Observation,
        ResourceKind::Procedure,
        ResourceKind::AdverseEvent,
        ResourceKind::MedicationStatement,
    ];

    /// Returns the FHIR resource type name.
    pub fn resource_type(&self) -> &'static str {
        match self {
            ResourceKind::Observation => "Observation",
            ResourceKind::Procedure => "Procedure",
            ResourceKind::AdverseEvent => "AdverseEvent",
            ResourceKind::MedicationStatement => "MedicationStatement",
            ResourceKind::Encounter => "Encounter",
        }
    }

    /// Parses a FHIR resource type name.
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        match resource_type {
            "Observation" => Some(ResourceKind::Observation),
            "Procedure" => Some(ResourceKind::Procedure),
            "AdverseEvent" => Some(ResourceKind::AdverseEvent),
            "MedicationStatement" => Some(ResourceKind::MedicationStatement),
            "Encounter" => Some(ResourceKind::Encounter),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_type())
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Trait for clinical data sources the resolver can query.
///
/// Implement this trait for your data source in your application crate.
/// All calls are blocking from the resolver's point of view.
///
/// # Required Methods
///
/// - [`find_protocol_definition`](Self::find_protocol_definition) - Protocol of a study
/// - [`find_subject`](Self::find_subject) - Subject enrolled in a study
/// - [`find_encounter_for_visit`](Self::find_encounter_for_visit) - A subject's encounter for a planned visit
/// - [`count_clinical_records`](Self::count_clinical_records) - Corroborating record count in a date predicate
///
/// # Optional Methods (with defaults)
///
/// - [`find_subjects`](Self::find_subjects) - Enumerate a study's subjects
pub trait ClinicalDataGateway: Send + Sync {
    /// Gets the protocol definition of a study.
    ///
    /// Returns `Ok(None)` if the study has no protocol.
    fn find_protocol_definition(&self, study_id: &str) -> GatewayResult<Option<ProtocolDefinition>>;

    /// Gets a subject enrolled in a study.
    ///
    /// Returns `Ok(None)` if the subject is not enrolled.
    fn find_subject(&self, subject_id: &str, study_id: &str) -> GatewayResult<Option<Subject>>;

    /// Gets the subject's encounter for a planned visit.
    ///
    /// Returns `Ok(None)` if no encounter is linked to the visit.
    fn find_encounter_for_visit(
        &self,
        subject: &Subject,
        visit_id: &str,
    ) -> GatewayResult<Option<Encounter>>;

    /// Counts the subject's records of one kind whose date satisfies the predicate.
    fn count_clinical_records(
        &self,
        subject: &Subject,
        kind: ResourceKind,
        predicate: &DatePredicate,
    ) -> GatewayResult<u64>;

    /// Lists the subjects enrolled in a study.
    ///
    /// The default returns no subjects; sources that can enumerate
    /// enrolment should override it.
    fn find_subjects(&self, study_id: &str) -> GatewayResult<Vec<Subject>> {
        let _ = study_id;
        Ok(Vec::new())
    }
}
