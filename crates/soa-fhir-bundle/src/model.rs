//! The subset of FHIR R4 resources the gateway reads.
//!
//! Only the elements used for protocol and visit resolution are modelled;
//! everything else in a resource is ignored on deserialization.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Bundle {
    pub resource_type: String,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BundleEntry {
    #[serde(default)]
    pub resource: Option<Value>,
}

/// A bundle entry's resource, dispatched on `resourceType`.
#[derive(Debug, Deserialize)]
#[serde(tag = "resourceType")]
pub(crate) enum Resource {
    ResearchStudy(ResearchStudy),
    PlanDefinition(PlanDefinition),
    ResearchSubject(ResearchSubject),
    CarePlan(CarePlan),
    ServiceRequest(ServiceRequest),
    Encounter(EncounterResource),
    Observation(ClinicalRecord),
    Procedure(ClinicalRecord),
    AdverseEvent(ClinicalRecord),
    MedicationStatement(ClinicalRecord),
    #[serde(other)]
    Other,
}

// =============================================================================
// Data types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Reference {
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Identifier {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Coding {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CodeableConcept {
    #[serde(default)]
    pub coding: Vec<Coding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Period {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Quantity {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Range {
    #[serde(default)]
    pub low: Option<Quantity>,
    #[serde(default)]
    pub high: Option<Quantity>,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ResearchStudy {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub identifier: Vec<Identifier>,
    #[serde(default)]
    pub protocol: Vec<Reference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlanDefinition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub action: Vec<PlanAction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlanAction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub definition_uri: Option<String>,
    #[serde(default)]
    pub definition_canonical: Option<String>,
    #[serde(default)]
    pub related_action: Vec<PlanRelatedAction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlanRelatedAction {
    /// `targetId` in R5.
    #[serde(default, alias = "targetId")]
    pub action_id: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub offset_range: Option<Range>,
    #[serde(default)]
    pub offset_duration: Option<Quantity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ResearchSubject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub identifier: Vec<Identifier>,
    #[serde(default)]
    pub study: Option<Reference>,
    /// `subject` in R5.
    #[serde(default, alias = "subject")]
    pub individual: Option<Reference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CarePlan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<Reference>,
    #[serde(default)]
    pub instantiates_canonical: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<Reference>,
    #[serde(default)]
    pub based_on: Vec<Reference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EncounterResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<Reference>,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub based_on: Vec<Reference>,
    #[serde(default, rename = "type")]
    pub kind: Vec<CodeableConcept>,
}

/// Observation, Procedure, AdverseEvent and MedicationStatement share the
/// elements needed for counting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClinicalRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<Reference>,
    #[serde(default)]
    pub patient: Option<Reference>,
    #[serde(default)]
    pub effective_date_time: Option<String>,
    #[serde(default)]
    pub effective_period: Option<Period>,
    #[serde(default)]
    pub performed_date_time: Option<String>,
    #[serde(default)]
    pub performed_period: Option<Period>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_asserted: Option<String>,
}

impl ClinicalRecord {
    /// The record's clinically relevant date, from the first element present.
    pub fn record_date(&self) -> Option<NaiveDate> {
        let candidates = [
            self.effective_date_time.as_deref(),
            self.effective_period.as_ref().and_then(|p| p.start.as_deref()),
            self.performed_date_time.as_deref(),
            self.performed_period.as_ref().and_then(|p| p.start.as_deref()),
            self.date.as_deref(),
            self.date_asserted.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .next()
            .and_then(parse_date_time)
            .map(|dt| dt.date())
    }

    pub fn patient_reference(&self) -> Option<&str> {
        self.subject
            .as_ref()
            .or(self.patient.as_ref())
            .and_then(|r| r.reference.as_deref())
    }
}

/// Parses a FHIR `date` or `dateTime`.
///
/// Zoned values keep their local wall-clock time, so a record stamped
/// `2024-01-17T23:30:00-05:00` falls on 2024-01-17.
pub(crate) fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(zoned.naive_local());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Returns true if two references name the same resource.
///
/// Handles relative versus absolute forms (`PlanDefinition/X` and
/// `http://host/fhir/PlanDefinition/X`), bare ids, and canonical versions
/// (`...|1.0`).
pub(crate) fn same_resource(a: &str, b: &str) -> bool {
    let a = strip_version(a.trim());
    let b = strip_version(b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || ends_with_segment(a, b) || ends_with_segment(b, a)
}

fn strip_version(reference: &str) -> &str {
    reference.split('|').next().unwrap_or(reference)
}

fn ends_with_segment(long: &str, short: &str) -> bool {
    long.len() > short.len()
        && long.ends_with(short)
        && long.as_bytes()[long.len() - short.len() - 1] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_time_forms() {
        assert_eq!(parse_date_time("2024-01-17").unwrap().date(), date(2024, 1, 17));
        assert_eq!(
            parse_date_time("2024-01-17T08:15:00").unwrap(),
            date(2024, 1, 17).and_hms_opt(8, 15, 0).unwrap()
        );
        assert_eq!(
            parse_date_time("2024-01-17T23:30:00-05:00").unwrap().date(),
            date(2024, 1, 17)
        );
        assert_eq!(
            parse_date_time("2024-01-17T08:15:00.250Z").unwrap().date(),
            date(2024, 1, 17)
        );
        assert!(parse_date_time("2024-01").is_none());
        assert!(parse_date_time("yesterday").is_none());
    }

    #[test]
    fn test_same_resource() {
        assert!(same_resource("PlanDefinition/V1", "PlanDefinition/V1"));
        assert!(same_resource("http://example.org/fhir/PlanDefinition/V1", "PlanDefinition/V1"));
        assert!(same_resource("PlanDefinition/V1|2.0", "PlanDefinition/V1"));
        assert!(same_resource("PlanDefinition/V1", "V1"));
        assert!(!same_resource("PlanDefinition/XV1", "V1"));
        assert!(!same_resource("PlanDefinition/V1", "PlanDefinition/V2"));
        assert!(!same_resource("", "V1"));
    }

    #[test]
    fn test_resource_dispatch() {
        let value = serde_json::json!({
            "resourceType": "Observation",
            "id": "o1",
            "subject": {"reference": "Patient/p1"},
            "effectiveDateTime": "2024-01-28T08:15:00"
        });
        match serde_json::from_value::<Resource>(value).unwrap() {
            Resource::Observation(record) => {
                assert_eq!(record.patient_reference(), Some("Patient/p1"));
                assert_eq!(record.record_date(), Some(date(2024, 1, 28)));
            }
            other => panic!("unexpected resource: {other:?}"),
        }

        let patient = serde_json::json!({"resourceType": "Patient", "id": "p1"});
        assert!(matches!(
            serde_json::from_value::<Resource>(patient).unwrap(),
            Resource::Other
        ));
    }

    #[test]
    fn test_record_date_precedence() {
        let record = ClinicalRecord {
            performed_period: Some(Period {
                start: Some("2024-02-01".to_string()),
                end: None,
            }),
            date: Some("2024-03-01".to_string()),
            ..Default::default()
        };
        assert_eq!(record.record_date(), Some(date(2024, 2, 1)));
    }
}
