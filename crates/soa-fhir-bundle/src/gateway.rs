//! A [`ClinicalDataGateway`] backed by an in-memory FHIR bundle.
//!
//! # Visit linkage
//!
//! A subject's encounter for a planned visit is found by following the
//! chain the protocol tooling writes:
//!
//! ```text
//! CarePlan (instantiatesCanonical = visit definition, subject = patient)
//!   └── ServiceRequest (basedOn = CarePlan)
//!         └── Encounter (basedOn = ServiceRequest)
//! ```
//!
//! When no chain exists, an encounter of the patient whose `basedOn` or
//! `type` code names the visit definition directly is used instead.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use soa_protocol::{DatePredicate, ProtocolDefinition};
use soa_window_resolver::{
    ClinicalDataGateway, Encounter, GatewayResult, Period, ResourceKind, Subject,
};
use tracing::{debug, info, warn};

use crate::error::{BundleError, BundleResult};
use crate::model::{
    parse_date_time, same_resource, Bundle, ClinicalRecord, EncounterResource, Identifier,
    PlanDefinition, Reference, Resource,
};
use crate::plan_definition::to_protocol_definition;

// =============================================================================
// Index entries
// =============================================================================

#[derive(Debug, Clone)]
struct StudyEntry {
    id: String,
    identifiers: Vec<String>,
    protocol: Option<String>,
}

impl StudyEntry {
    fn matches(&self, study_id: &str) -> bool {
        self.id == study_id || self.identifiers.iter().any(|i| i == study_id)
    }

    fn reference(&self) -> String {
        format!("ResearchStudy/{}", self.id)
    }
}

#[derive(Debug, Clone)]
struct SubjectEntry {
    id: String,
    identifiers: Vec<String>,
    study: String,
    patient: String,
}

impl SubjectEntry {
    fn matches(&self, subject_id: &str) -> bool {
        self.id == subject_id || self.identifiers.iter().any(|i| i == subject_id)
    }
}

#[derive(Debug, Clone)]
struct CarePlanEntry {
    id: String,
    patient: Option<String>,
    canonicals: Vec<String>,
}

#[derive(Debug, Clone)]
struct ServiceRequestEntry {
    id: String,
    patient: Option<String>,
    based_on: Vec<String>,
}

#[derive(Debug, Clone)]
struct EncounterEntry {
    encounter: Encounter,
    patient: String,
    based_on: Vec<String>,
    type_codes: Vec<String>,
}

#[derive(Debug, Clone)]
struct RecordEntry {
    kind: ResourceKind,
    patient: String,
    date: NaiveDate,
}

/// Counts of indexed resources, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleStats {
    /// Entries in the bundle.
    pub entries: usize,
    /// Entries skipped as malformed or incomplete.
    pub skipped: usize,
    /// Studies with a usable protocol.
    pub protocols: usize,
    /// Enrolled subjects.
    pub subjects: usize,
    /// Dated encounters.
    pub encounters: usize,
    /// Dated corroborating records.
    pub records: usize,
}

// =============================================================================
// Gateway
// =============================================================================

/// An in-memory clinical data source loaded from a FHIR `Bundle`.
///
/// The bundle is indexed once at load time; every gateway call is then a
/// read-only scan of the index, so a `BundleGateway` can be shared freely
/// between threads.
///
/// # Example
///
/// ```ignore
/// use soa_fhir_bundle::BundleGateway;
/// use soa_window_resolver::VisitResolver;
///
/// let gateway = BundleGateway::from_path("lzzt-bundle.json")?;
/// let resolver = VisitResolver::new(&gateway, "H2Q-MC-LZZT");
/// let protocol = resolver.load_protocol()?;
/// let resolution = resolver.resolve("01-701-1015", &protocol)?;
/// ```
#[derive(Debug, Default)]
pub struct BundleGateway {
    studies: Vec<StudyEntry>,
    protocols: HashMap<String, ProtocolDefinition>,
    subjects: Vec<SubjectEntry>,
    care_plans: Vec<CarePlanEntry>,
    service_requests: Vec<ServiceRequestEntry>,
    encounters: Vec<EncounterEntry>,
    records: Vec<RecordEntry>,
    stats: BundleStats,
}

impl BundleGateway {
    /// Loads a bundle from a JSON string.
    pub fn from_json_str(json: &str) -> BundleResult<Self> {
        let bundle: Bundle = serde_json::from_str(json)?;
        Self::from_bundle(bundle)
    }

    /// Loads a bundle from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> BundleResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| BundleError::io_error(path, e))?;
        let bundle: Bundle = serde_json::from_reader(BufReader::new(file))?;
        debug!(path = %path.display(), "read bundle file");
        Self::from_bundle(bundle)
    }

    /// Loads a bundle from an already parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> BundleResult<Self> {
        let bundle: Bundle = serde_json::from_value(value)?;
        Self::from_bundle(bundle)
    }

    fn from_bundle(bundle: Bundle) -> BundleResult<Self> {
        if bundle.resource_type != "Bundle" {
            return Err(BundleError::NotABundle(bundle.resource_type));
        }

        let mut gateway = Self::default();
        let mut plan_definitions: Vec<PlanDefinition> = Vec::new();
        gateway.stats.entries = bundle.entry.len();

        for (position, entry) in bundle.entry.into_iter().enumerate() {
            let Some(value) = entry.resource else {
                gateway.skip(position, "entry has no resource");
                continue;
            };
            match serde_json::from_value::<Resource>(value) {
                Ok(Resource::PlanDefinition(plan)) => plan_definitions.push(plan),
                Ok(resource) => gateway.index(position, resource),
                Err(err) => gateway.skip(position, &err.to_string()),
            }
        }

        gateway.link_protocols(&plan_definitions)?;
        gateway.stats.subjects = gateway.subjects.len();
        gateway.stats.encounters = gateway.encounters.len();
        gateway.stats.records = gateway.records.len();

        info!(
            entries = gateway.stats.entries,
            skipped = gateway.stats.skipped,
            studies = gateway.studies.len(),
            subjects = gateway.stats.subjects,
            encounters = gateway.stats.encounters,
            records = gateway.stats.records,
            "indexed FHIR bundle"
        );
        Ok(gateway)
    }

    /// Returns counts of the indexed resources.
    pub fn stats(&self) -> BundleStats {
        self.stats
    }

    fn skip(&mut self, position: usize, reason: &str) {
        warn!(entry = position, reason, "skipping bundle entry");
        self.stats.skipped += 1;
    }

    fn index(&mut self, position: usize, resource: Resource) {
        match resource {
            Resource::ResearchStudy(study) => {
                let Some(id) = study.id else {
                    return self.skip(position, "ResearchStudy without id");
                };
                self.studies.push(StudyEntry {
                    id,
                    identifiers: identifier_values(&study.identifier),
                    protocol: study.protocol.first().and_then(reference_of),
                });
            }
            Resource::ResearchSubject(subject) => {
                let (Some(id), Some(study), Some(patient)) = (
                    subject.id,
                    subject.study.as_ref().and_then(reference_of),
                    subject.individual.as_ref().and_then(reference_of),
                ) else {
                    return self.skip(position, "ResearchSubject without id, study or individual");
                };
                self.subjects.push(SubjectEntry {
                    id,
                    identifiers: identifier_values(&subject.identifier),
                    study,
                    patient,
                });
            }
            Resource::CarePlan(plan) => {
                let Some(id) = plan.id else {
                    return self.skip(position, "CarePlan without id");
                };
                self.care_plans.push(CarePlanEntry {
                    id,
                    patient: plan.subject.as_ref().and_then(reference_of),
                    canonicals: plan.instantiates_canonical,
                });
            }
            Resource::ServiceRequest(request) => {
                let Some(id) = request.id else {
                    return self.skip(position, "ServiceRequest without id");
                };
                self.service_requests.push(ServiceRequestEntry {
                    id,
                    patient: request.subject.as_ref().and_then(reference_of),
                    based_on: request.based_on.iter().filter_map(reference_of).collect(),
                });
            }
            Resource::Encounter(encounter) => match encounter_entry(encounter) {
                Some(entry) => self.encounters.push(entry),
                None => self.skip(position, "Encounter without id, subject or period start"),
            },
            Resource::Observation(record) => {
                self.index_record(position, ResourceKind::Observation, &record)
            }
            Resource::Procedure(record) => {
                self.index_record(position, ResourceKind::Procedure, &record)
            }
            Resource::AdverseEvent(record) => {
                self.index_record(position, ResourceKind::AdverseEvent, &record)
            }
            Resource::MedicationStatement(record) => {
                self.index_record(position, ResourceKind::MedicationStatement, &record)
            }
            Resource::PlanDefinition(_) | Resource::Other => {}
        }
    }

    fn index_record(&mut self, position: usize, kind: ResourceKind, record: &ClinicalRecord) {
        match (record.patient_reference(), record.record_date()) {
            (Some(patient), Some(date)) => self.records.push(RecordEntry {
                kind,
                patient: patient.to_string(),
                date,
            }),
            _ => {
                let id = record.id.as_deref().unwrap_or_default();
                warn!(entry = position, kind = %kind, id, "record without patient or date");
                self.stats.skipped += 1;
            }
        }
    }

    /// Converts the PlanDefinition each study points at.
    ///
    /// Only protocol PlanDefinitions are converted; visit-level definitions
    /// are identities, not protocols.
    fn link_protocols(&mut self, plan_definitions: &[PlanDefinition]) -> BundleResult<()> {
        for study in &self.studies {
            let Some(reference) = study.protocol.as_deref() else {
                continue;
            };
            let plan = plan_definitions.iter().find(|plan| {
                plan.id
                    .as_deref()
                    .is_some_and(|id| same_resource(reference, &format!("PlanDefinition/{id}")))
                    || plan.url.as_deref().is_some_and(|url| same_resource(reference, url))
            });
            match plan {
                Some(plan) => {
                    let definition = to_protocol_definition(plan)?;
                    self.protocols.insert(study.id.clone(), definition);
                }
                None => warn!(
                    study = %study.id,
                    protocol = reference,
                    "protocol PlanDefinition not in bundle"
                ),
            }
        }
        self.stats.protocols = self.protocols.len();
        Ok(())
    }

    fn find_study(&self, study_id: &str) -> Option<&StudyEntry> {
        self.studies.iter().find(|s| s.matches(study_id))
    }

    /// Encounters reached through CarePlan → ServiceRequest → Encounter.
    fn chained_encounters<'s>(
        &'s self,
        patient: &'s str,
        visit_id: &'s str,
    ) -> impl Iterator<Item = &'s EncounterEntry> + 's {
        let plans: Vec<&CarePlanEntry> = self
            .care_plans
            .iter()
            .filter(|cp| cp.patient.as_deref().map_or(true, |p| same_resource(p, patient)))
            .filter(|cp| cp.canonicals.iter().any(|c| same_resource(c, visit_id)))
            .collect();

        let requests: Vec<&ServiceRequestEntry> = self
            .service_requests
            .iter()
            .filter(|sr| sr.patient.as_deref().map_or(true, |p| same_resource(p, patient)))
            .filter(|sr| {
                plans.iter().any(|cp| {
                    sr.based_on
                        .iter()
                        .any(|b| same_resource(b, &format!("CarePlan/{}", cp.id)))
                })
            })
            .collect();

        self.patient_encounters(patient).filter(move |enc| {
            requests.iter().any(|sr| {
                enc.based_on
                    .iter()
                    .any(|b| same_resource(b, &format!("ServiceRequest/{}", sr.id)))
            })
        })
    }

    /// Encounters naming the visit definition directly.
    fn direct_encounters<'s>(
        &'s self,
        patient: &'s str,
        visit_id: &'s str,
    ) -> impl Iterator<Item = &'s EncounterEntry> + 's {
        self.patient_encounters(patient).filter(move |enc| {
            enc.based_on.iter().any(|b| same_resource(b, visit_id))
                || enc.type_codes.iter().any(|c| same_resource(visit_id, c))
        })
    }

    fn patient_encounters<'s>(
        &'s self,
        patient: &'s str,
    ) -> impl Iterator<Item = &'s EncounterEntry> + 's {
        self.encounters
            .iter()
            .filter(move |enc| same_resource(&enc.patient, patient))
    }
}

impl ClinicalDataGateway for BundleGateway {
    fn find_protocol_definition(
        &self,
        study_id: &str,
    ) -> GatewayResult<Option<ProtocolDefinition>> {
        Ok(self
            .find_study(study_id)
            .and_then(|study| self.protocols.get(&study.id))
            .cloned())
    }

    fn find_subject(&self, subject_id: &str, study_id: &str) -> GatewayResult<Option<Subject>> {
        let Some(study) = self.find_study(study_id) else {
            return Ok(None);
        };
        let study_ref = study.reference();
        Ok(self
            .subjects
            .iter()
            .find(|s| s.matches(subject_id) && same_resource(&s.study, &study_ref))
            .map(|s| Subject::new(subject_id, study_id, s.patient.clone())))
    }

    fn find_encounter_for_visit(
        &self,
        subject: &Subject,
        visit_id: &str,
    ) -> GatewayResult<Option<Encounter>> {
        let patient = subject.patient_reference.as_str();
        let earliest = |candidates: Vec<&EncounterEntry>| {
            candidates
                .into_iter()
                .min_by_key(|e| e.encounter.period.start)
                .map(|e| e.encounter.clone())
        };

        if let Some(found) = earliest(self.chained_encounters(patient, visit_id).collect()) {
            return Ok(Some(found));
        }
        let direct = earliest(self.direct_encounters(patient, visit_id).collect());
        if direct.is_none() {
            debug!(subject = %subject.subject_id, visit = visit_id, "no encounter linked to visit");
        }
        Ok(direct)
    }

    fn count_clinical_records(
        &self,
        subject: &Subject,
        kind: ResourceKind,
        predicate: &DatePredicate,
    ) -> GatewayResult<u64> {
        let patient = subject.patient_reference.as_str();
        let count = match kind {
            ResourceKind::Encounter => self
                .patient_encounters(patient)
                .filter(|e| predicate.contains(e.encounter.period.start.date()))
                .count(),
            _ => self
                .records
                .iter()
                .filter(|r| {
                    r.kind == kind
                        && same_resource(&r.patient, patient)
                        && predicate.contains(r.date)
                })
                .count(),
        };
        Ok(count as u64)
    }

    fn find_subjects(&self, study_id: &str) -> GatewayResult<Vec<Subject>> {
        let Some(study) = self.find_study(study_id) else {
            return Ok(Vec::new());
        };
        let study_ref = study.reference();
        Ok(self
            .subjects
            .iter()
            .filter(|s| same_resource(&s.study, &study_ref))
            .map(|s| Subject::new(s.id.clone(), study_id, s.patient.clone()))
            .collect())
    }
}

fn reference_of(reference: &Reference) -> Option<String> {
    reference
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

fn identifier_values(identifiers: &[Identifier]) -> Vec<String> {
    identifiers.iter().filter_map(|i| i.value.clone()).collect()
}

fn encounter_entry(resource: EncounterResource) -> Option<EncounterEntry> {
    let id = resource.id?;
    let patient = resource.subject.as_ref().and_then(reference_of)?;
    let period = resource.period.as_ref()?;
    let start = period.start.as_deref().and_then(parse_date_time)?;
    let end = period.end.as_deref().and_then(parse_date_time);

    Some(EncounterEntry {
        encounter: Encounter::new(id, Period::new(start, end)),
        patient,
        based_on: resource.based_on.iter().filter_map(reference_of).collect(),
        type_codes: resource
            .kind
            .iter()
            .flat_map(|concept| concept.coding.iter())
            .filter_map(|coding| coding.code.clone())
            .collect(),
    })
}
