//! Mapping of FHIR PlanDefinition resources onto protocol definitions.

use soa_protocol::{
    DurationUnit, Offset, ProtocolDefinition, ProtocolError, RawAction, RelatedAction, Relationship,
};
use tracing::warn;

use crate::error::{BundleError, BundleResult};
use crate::model::{PlanAction, PlanDefinition, PlanRelatedAction, Quantity};

/// Parses a standalone PlanDefinition JSON document.
///
/// # Example
///
/// ```
/// use soa_fhir_bundle::parse_plan_definition;
///
/// let json = r#"{
///   "resourceType": "PlanDefinition",
///   "id": "LZZT",
///   "action": [
///     {"id": "bl", "definitionUri": "PlanDefinition/BASELINE"},
///     {"definitionUri": "PlanDefinition/WEEK-2",
///      "relatedAction": [{"actionId": "bl", "relationship": "after",
///        "offsetRange": {"low": {"value": 14, "code": "d"}, "high": {"value": 21, "code": "d"}}}]}
///   ]
/// }"#;
/// let definition = parse_plan_definition(json).unwrap();
/// assert_eq!(definition.actions.len(), 2);
/// assert_eq!(definition.actions[1].related[0].target_action_id, "bl");
/// ```
pub fn parse_plan_definition(json: &str) -> BundleResult<ProtocolDefinition> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match value.get("resourceType").and_then(|t| t.as_str()) {
        Some("PlanDefinition") => {}
        other => {
            return Err(BundleError::invalid(
                "PlanDefinition",
                "",
                format!("resourceType is {}", other.unwrap_or("missing")),
            ))
        }
    }
    let plan: PlanDefinition = serde_json::from_value(value)?;
    to_protocol_definition(&plan)
}

/// Converts a PlanDefinition into a protocol definition.
///
/// Actions keep their declared order. The visit identity is the action's
/// `definitionUri`, or its `definitionCanonical` when no URI is given.
pub(crate) fn to_protocol_definition(plan: &PlanDefinition) -> BundleResult<ProtocolDefinition> {
    let id = plan
        .id
        .clone()
        .or_else(|| plan.url.clone())
        .unwrap_or_default();

    let actions = plan
        .action
        .iter()
        .map(|action| to_raw_action(&id, action))
        .collect::<BundleResult<Vec<_>>>()?;

    Ok(ProtocolDefinition {
        id,
        version: plan.version.clone(),
        actions,
    })
}

fn to_raw_action(plan_id: &str, action: &PlanAction) -> BundleResult<RawAction> {
    let definition_uri = action
        .definition_uri
        .clone()
        .or_else(|| action.definition_canonical.clone())
        .unwrap_or_default();

    let mut raw = RawAction::new(definition_uri);
    raw.action_id = action.id.clone();
    raw.title = action.title.clone();

    for related in &action.related_action {
        let Some(target) = related.action_id.as_deref() else {
            warn!(
                plan = plan_id,
                visit = %raw.definition_uri,
                "relatedAction without actionId ignored"
            );
            continue;
        };
        raw.related.push(to_related_action(plan_id, &raw.definition_uri, target, related)?);
    }
    Ok(raw)
}

fn to_related_action(
    plan_id: &str,
    visit_id: &str,
    target: &str,
    related: &PlanRelatedAction,
) -> BundleResult<RelatedAction> {
    let code = related.relationship.as_deref().unwrap_or_default();
    let relationship = Relationship::from_code(code).ok_or_else(|| BundleError::Protocol {
        id: plan_id.to_string(),
        source: ProtocolError::UnsupportedRelationship {
            visit_id: visit_id.to_string(),
            code: code.to_string(),
        },
    })?;

    let (offset_low, offset_high) = match (&related.offset_range, &related.offset_duration) {
        (Some(range), _) => (
            range.low.as_ref().map(|q| to_offset(plan_id, q)).transpose()?.flatten(),
            range.high.as_ref().map(|q| to_offset(plan_id, q)).transpose()?.flatten(),
        ),
        (None, Some(duration)) => {
            let offset = to_offset(plan_id, duration)?;
            (offset.clone(), offset)
        }
        (None, None) => (None, None),
    };

    Ok(RelatedAction {
        target_action_id: target.to_string(),
        relationship,
        offset_low,
        offset_high,
    })
}

/// Reads a duration quantity. A quantity with no value is an open bound.
fn to_offset(plan_id: &str, quantity: &Quantity) -> BundleResult<Option<Offset>> {
    let Some(value) = quantity.value else {
        return Ok(None);
    };
    if !value.is_finite() {
        return Err(BundleError::invalid(
            "PlanDefinition",
            plan_id,
            format!("offset value {value} is not finite"),
        ));
    }
    let unit = DurationUnit::from_code(quantity.code.as_deref().or(quantity.unit.as_deref()));
    // Fractional magnitudes are truncated toward zero.
    Ok(Some(Offset::new(value.trunc() as i64, unit)))
}
