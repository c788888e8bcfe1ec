//! End-to-end tests: FHIR bundle in, visit tiers out.

use chrono::NaiveDate;
use serde_json::{json, Value};
use soa_fhir_bundle::{BundleError, BundleGateway};
use soa_protocol::{DatePredicate, ProtocolError};
use soa_window_resolver::{
    ClinicalDataGateway, MatchTier, ResolveError, ResolverConfig, ResourceKind, StudyResolver,
    VisitResolver,
};

const STUDY: &str = "H2Q-MC-LZZT";

fn protocol_plan(week2_relationship: &str) -> Value {
    json!({
        "resourceType": "PlanDefinition",
        "id": "H2Q-MC-LZZT-SOA",
        "version": "1",
        "action": [
            {"id": "bl", "title": "Baseline", "definitionUri": "PlanDefinition/BASELINE"},
            {
                "title": "Week 1",
                "definitionUri": "PlanDefinition/WEEK-1",
                "relatedAction": [{
                    "actionId": "bl",
                    "relationship": "after",
                    "offsetRange": {"low": {"value": 7, "code": "d"}, "high": {"value": 7, "code": "d"}}
                }]
            },
            {
                "title": "Week 2",
                "definitionUri": "PlanDefinition/WEEK-2",
                "relatedAction": [{
                    "actionId": "bl",
                    "relationship": week2_relationship,
                    "offsetRange": {"low": {"value": 14, "code": "d"}, "high": {"value": 21, "code": "d"}}
                }]
            },
            {
                "title": "Week 4",
                "definitionUri": "PlanDefinition/WEEK-4",
                "relatedAction": [{
                    "actionId": "bl",
                    "relationship": "after-start",
                    "offsetRange": {"low": {"value": 28, "code": "d"}, "high": {"value": 35, "code": "d"}}
                }]
            }
        ]
    })
}

/// CarePlan → ServiceRequest → Encounter for one visit.
fn visit_chain(patient: &str, visit: &str, start: &str, end: &str) -> Vec<Value> {
    let key = format!("{}-{}", patient.trim_start_matches("Patient/"), visit);
    vec![
        json!({
            "resourceType": "CarePlan",
            "id": format!("cp-{key}"),
            "status": "completed",
            "intent": "order",
            "subject": {"reference": patient},
            "instantiatesCanonical": [format!("PlanDefinition/{visit}")]
        }),
        json!({
            "resourceType": "ServiceRequest",
            "id": format!("sr-{key}"),
            "status": "completed",
            "intent": "order",
            "subject": {"reference": patient},
            "basedOn": [{"reference": format!("CarePlan/cp-{key}")}]
        }),
        json!({
            "resourceType": "Encounter",
            "id": format!("enc-{key}"),
            "status": "finished",
            "subject": {"reference": patient},
            "basedOn": [{"reference": format!("ServiceRequest/sr-{key}")}],
            "period": {"start": start, "end": end}
        }),
    ]
}

fn observation(id: &str, patient: &str, at: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "subject": {"reference": patient},
        "effectiveDateTime": at
    })
}

fn lzzt_bundle(week2_relationship: &str, extra: Vec<Value>) -> Value {
    let mut resources = vec![
        json!({
            "resourceType": "ResearchStudy",
            "id": "lzzt",
            "identifier": [{"value": STUDY}],
            "protocol": [{"reference": "PlanDefinition/H2Q-MC-LZZT-SOA"}]
        }),
        protocol_plan(week2_relationship),
        // Visit-level definitions carry no actions of their own.
        json!({"resourceType": "PlanDefinition", "id": "BASELINE"}),
        json!({"resourceType": "PlanDefinition", "id": "WEEK-1"}),
        json!({
            "resourceType": "ResearchSubject",
            "id": "rs-1015",
            "identifier": [{"value": "01-701-1015"}],
            "study": {"reference": "ResearchStudy/lzzt"},
            "individual": {"reference": "Patient/p1015"}
        }),
        json!({
            "resourceType": "ResearchSubject",
            "id": "rs-1023",
            "identifier": [{"value": "01-701-1023"}],
            "study": {"reference": "ResearchStudy/lzzt"},
            "individual": {"reference": "Patient/p1023"}
        }),
        json!({"resourceType": "Patient", "id": "p1015"}),
        json!({"resourceType": "Patient", "id": "p1023"}),
    ];

    // 01-701-1015: linked through CarePlans, WEEK-4 never happened.
    for (visit, start, end) in [
        ("BASELINE", "2024-01-10T08:00:00", "2024-01-10T12:00:00"),
        ("WEEK-1", "2024-01-17T09:00:00", "2024-01-17T09:00:00"),
        ("WEEK-2", "2024-01-26T09:00:00", "2024-01-26T11:00:00"),
    ] {
        resources.extend(visit_chain("Patient/p1015", visit, start, end));
    }
    resources.push(json!({
        "resourceType": "Procedure",
        "id": "proc-1015-bl",
        "subject": {"reference": "Patient/p1015"},
        "performedDateTime": "2024-01-10T09:30:00"
    }));
    resources.push(observation("obs-1015-w1", "Patient/p1015", "2024-01-17T09:15:00"));
    resources.push(observation("obs-1015-w2", "Patient/p1015", "2024-01-28T08:15:00"));

    // 01-701-1023: encounters name their visit directly, no records.
    resources.push(json!({
        "resourceType": "Encounter",
        "id": "enc-1023-bl",
        "subject": {"reference": "Patient/p1023"},
        "basedOn": [{"reference": "PlanDefinition/BASELINE"}],
        "period": {"start": "2024-02-01"}
    }));
    resources.push(json!({
        "resourceType": "Encounter",
        "id": "enc-1023-w1",
        "subject": {"reference": "Patient/p1023"},
        "type": [{"coding": [{"code": "PlanDefinition/WEEK-1"}]}],
        "period": {"start": "2024-02-08T09:00:00", "end": "2024-02-08T10:00:00"}
    }));

    resources.extend(extra);
    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": resources.into_iter().map(|r| json!({"resource": r})).collect::<Vec<_>>()
    })
}

fn create_test_gateway() -> BundleGateway {
    BundleGateway::from_value(lzzt_bundle("after", Vec::new())).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_bundle_stats() {
    let stats = create_test_gateway().stats();
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.protocols, 1);
    assert_eq!(stats.subjects, 2);
    assert_eq!(stats.encounters, 5);
    assert_eq!(stats.records, 3);
}

#[test]
fn test_protocol_from_study() {
    let gateway = create_test_gateway();
    let definition = gateway.find_protocol_definition(STUDY).unwrap().unwrap();
    assert_eq!(definition.id, "H2Q-MC-LZZT-SOA");
    assert_eq!(definition.actions.len(), 4);

    // The study is also addressable by resource id.
    assert!(gateway.find_protocol_definition("lzzt").unwrap().is_some());
    assert!(gateway.find_protocol_definition("OTHER").unwrap().is_none());
}

#[test]
fn test_unsupported_relationship_fails_load() {
    let err =
        BundleGateway::from_value(lzzt_bundle("concurrent-with-start", Vec::new())).unwrap_err();
    assert!(matches!(
        err,
        BundleError::Protocol {
            source: ProtocolError::UnsupportedRelationship { .. },
            ..
        }
    ));
}

#[test]
fn test_out_of_range_offset_fails_protocol_build() {
    let bundle = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": {
                "resourceType": "ResearchStudy",
                "id": "S",
                "protocol": [{"reference": "PlanDefinition/P"}]
            }},
            {"resource": {
                "resourceType": "PlanDefinition",
                "id": "P",
                "action": [
                    {"id": "bl", "definitionUri": "PlanDefinition/BASELINE"},
                    {
                        "definitionUri": "PlanDefinition/SCREENING",
                        "relatedAction": [{
                            "actionId": "bl",
                            "relationship": "before",
                            "offsetRange": {"low": {"value": -1.0e30, "code": "d"}}
                        }]
                    }
                ]
            }}
        ]
    });
    let gateway = BundleGateway::from_value(bundle).unwrap();

    let err = VisitResolver::new(&gateway, "S").load_protocol().unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Protocol(ProtocolError::OffsetOutOfRange { value: i64::MIN, .. })
    ));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lzzt-bundle.json");
    std::fs::write(&path, lzzt_bundle("after", Vec::new()).to_string()).unwrap();

    let gateway = BundleGateway::from_path(&path).unwrap();
    assert_eq!(gateway.stats(), create_test_gateway().stats());
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BundleGateway::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, BundleError::Io { .. }));
}

// =============================================================================
// Gateway lookups
// =============================================================================

#[test]
fn test_find_subject_by_identifier() {
    let gateway = create_test_gateway();
    let subject = gateway.find_subject("01-701-1015", STUDY).unwrap().unwrap();
    assert_eq!(subject.patient_reference, "Patient/p1015");
    assert_eq!(subject.subject_id, "01-701-1015");

    assert!(gateway.find_subject("01-701-9999", STUDY).unwrap().is_none());
    assert!(gateway.find_subject("01-701-1015", "OTHER").unwrap().is_none());
}

#[test]
fn test_chain_takes_priority_over_direct_link() {
    let gateway = BundleGateway::from_value(lzzt_bundle(
        "after",
        vec![json!({
            "resourceType": "Encounter",
            "id": "enc-1015-stray",
            "subject": {"reference": "Patient/p1015"},
            "basedOn": [{"reference": "PlanDefinition/WEEK-2"}],
            "period": {"start": "2024-01-20T09:00:00"}
        })],
    ))
    .unwrap();
    let subject = gateway.find_subject("01-701-1015", STUDY).unwrap().unwrap();
    let encounter = gateway
        .find_encounter_for_visit(&subject, "PlanDefinition/WEEK-2")
        .unwrap()
        .unwrap();
    assert_eq!(encounter.id, "enc-p1015-WEEK-2");
}

#[test]
fn test_count_records_in_window() {
    let gateway = create_test_gateway();
    let subject = gateway.find_subject("01-701-1015", STUDY).unwrap().unwrap();
    let window = DatePredicate::Between {
        low: date(2024, 1, 24),
        high: date(2024, 1, 31),
    };
    let count = |kind| gateway.count_clinical_records(&subject, kind, &window).unwrap();

    assert_eq!(count(ResourceKind::Observation), 1);
    assert_eq!(count(ResourceKind::Procedure), 0);
    assert_eq!(count(ResourceKind::Encounter), 1);
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_resolve_subject_from_bundle() {
    let gateway = create_test_gateway();
    let resolver = VisitResolver::new(&gateway, STUDY);
    let protocol = resolver.load_protocol().unwrap();
    let resolution = resolver.resolve("01-701-1015", &protocol).unwrap();

    assert_eq!(resolution.anchor, date(2024, 1, 10));
    assert_eq!(resolution.tier("PlanDefinition/BASELINE"), Some(MatchTier::Green));

    let week1 = resolution.get("PlanDefinition/WEEK-1").unwrap();
    assert_eq!(week1.tier, Some(MatchTier::Green));
    assert_eq!(week1.datequery_description(), "date=2024-01-17");

    let week2 = resolution.get("PlanDefinition/WEEK-2").unwrap();
    assert_eq!(week2.tier, Some(MatchTier::Orange));
    assert_eq!(week2.datequery_description(), "date=ge2024-01-24&date=le2024-01-31");
    assert_eq!(week2.encounter_id.as_deref(), Some("enc-p1015-WEEK-2"));

    let week4 = resolution.get("PlanDefinition/WEEK-4").unwrap();
    assert!(week4.skipped());
    assert_eq!(week4.tier, None);
}

#[test]
fn test_resolve_subject_with_direct_links() {
    let gateway = create_test_gateway();
    let resolver = VisitResolver::new(&gateway, STUDY);
    let protocol = resolver.load_protocol().unwrap();
    let resolution = resolver.resolve("01-701-1023", &protocol).unwrap();

    assert_eq!(resolution.anchor, date(2024, 2, 1));
    let week1 = resolution.get("PlanDefinition/WEEK-1").unwrap();
    assert_eq!(week1.tier, Some(MatchTier::Red));
    assert_eq!(week1.datequery_description(), "date=ge2024-02-08&date=le2024-02-08");
}

#[test]
fn test_unknown_subject() {
    let gateway = create_test_gateway();
    let resolver = VisitResolver::new(&gateway, STUDY);
    let protocol = resolver.load_protocol().unwrap();
    let err = resolver.resolve("01-701-9999", &protocol).unwrap_err();
    assert!(matches!(err, ResolveError::SubjectNotFound { .. }));
}

#[test]
fn test_resolve_study_from_bundle() {
    let gateway = create_test_gateway();
    let run = StudyResolver::new(&gateway, ResolverConfig::default())
        .resolve_study(STUDY)
        .unwrap();

    assert_eq!(run.reports.len(), 2);
    assert_eq!(run.failed().count(), 0);

    let summary = run.summary();
    assert_eq!(summary.green, 2);
    assert_eq!(summary.orange, 1);
    assert_eq!(summary.red, 2);
    assert_eq!(summary.skipped, 3);
}

#[test]
fn test_resolve_unknown_study() {
    let gateway = create_test_gateway();
    let err = StudyResolver::new(&gateway, ResolverConfig::default())
        .resolve_study("OTHER")
        .unwrap_err();
    assert!(matches!(err, ResolveError::ProtocolNotFound(_)));
}
