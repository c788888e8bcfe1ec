//! Protocol graph construction.
//!
//! Turns the declared action list of a protocol into [`VisitPlan`] nodes keyed
//! by visit identity, and resolves the single index (anchor) visit.
//!
//! Related actions reference *local* action ids rather than visit identities,
//! so the build runs in two passes over an explicit `action_id -> visit_id`
//! table:
//!
//! 1. Register every visit and its local action id.
//! 2. Resolve each related-action descriptor through the table, copy its
//!    relationship and offsets onto the referring plan, and mark the
//!    referenced visit as the index.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::action::{Offset, ProtocolDefinition, RawAction, Relationship};
use crate::error::{ProtocolError, ProtocolResult};

/// Largest offset magnitude accepted, in days (one hundred years).
pub const MAX_OFFSET_DAYS: i64 = 36_525;

/// How non-day offset units are handled while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnitPolicy {
    /// Fail with [`ProtocolError::UnsupportedUnit`].
    #[default]
    Reject,
    /// Use the magnitude as a number of days and flag the plan as approximate.
    ApproximateAsDays,
}

/// Options for [`ProtocolGraph::build_with_options`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Policy for offsets expressed in units other than days.
    pub unit_policy: UnitPolicy,
}

impl BuildOptions {
    /// Sets the unit policy.
    pub fn with_unit_policy(mut self, unit_policy: UnitPolicy) -> Self {
        self.unit_policy = unit_policy;
        self
    }
}

/// One planned protocol activity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisitPlan {
    /// Visit identity (the action's definition reference).
    pub visit_id: String,
    /// Position in the declared action order. Only a tie-break, never a time order.
    pub ordinal: usize,
    /// Human readable title, when declared.
    pub title: Option<String>,
    /// Local action id, when declared.
    pub action_id: Option<String>,
    /// Whether this is the temporal anchor of the protocol.
    pub is_index: bool,
    /// The visit this plan's offsets are relative to.
    pub related_visit_id: Option<String>,
    /// Direction of the offsets. Absent on the index.
    pub relationship: Option<Relationship>,
    /// Lower offset magnitude.
    pub offset_low: Option<Offset>,
    /// Upper offset magnitude.
    pub offset_high: Option<Offset>,
    /// Set when a non-day offset unit was read as days.
    pub approximate_units: bool,
}

impl VisitPlan {
    /// Creates an unrelated, non-index plan.
    pub fn new(visit_id: impl Into<String>, ordinal: usize) -> Self {
        Self {
            visit_id: visit_id.into(),
            ordinal,
            title: None,
            action_id: None,
            is_index: false,
            related_visit_id: None,
            relationship: None,
            offset_low: None,
            offset_high: None,
            approximate_units: false,
        }
    }

    /// Creates an index plan.
    pub fn index(visit_id: impl Into<String>, ordinal: usize) -> Self {
        Self {
            is_index: true,
            ..Self::new(visit_id, ordinal)
        }
    }

    /// Creates a plan related to another visit by day offsets.
    pub fn related(
        visit_id: impl Into<String>,
        ordinal: usize,
        related_visit_id: impl Into<String>,
        relationship: Relationship,
        low: Option<i64>,
        high: Option<i64>,
    ) -> Self {
        Self {
            related_visit_id: Some(related_visit_id.into()),
            relationship: Some(relationship),
            offset_low: low.map(Offset::days),
            offset_high: high.map(Offset::days),
            ..Self::new(visit_id, ordinal)
        }
    }
}

/// The visits of one protocol, keyed by visit identity.
///
/// Iteration follows the declared action order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolGraph {
    plans: Vec<VisitPlan>,
    by_id: HashMap<String, usize>,
}

impl ProtocolGraph {
    /// Builds a graph from declared actions using default options.
    pub fn build(actions: &[RawAction]) -> ProtocolResult<Self> {
        Self::build_with_options(actions, &BuildOptions::default())
    }

    /// Builds a graph from a protocol definition.
    pub fn from_definition(
        definition: &ProtocolDefinition,
        options: &BuildOptions,
    ) -> ProtocolResult<Self> {
        debug!(
            protocol = %definition.id,
            actions = definition.actions.len(),
            "building protocol graph"
        );
        Self::build_with_options(&definition.actions, options)
    }

    /// Builds a graph from declared actions.
    pub fn build_with_options(
        actions: &[RawAction],
        options: &BuildOptions,
    ) -> ProtocolResult<Self> {
        if actions.is_empty() {
            return Err(ProtocolError::EmptyProtocol);
        }

        // Pass 1: visit registry and the local action id table.
        let mut plans = Vec::with_capacity(actions.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(actions.len());
        let mut action_table: HashMap<&str, usize> = HashMap::new();

        for (ordinal, action) in actions.iter().enumerate() {
            let visit_id = action.definition_uri.trim();
            if visit_id.is_empty() {
                return Err(ProtocolError::MissingDefinition { ordinal });
            }
            if by_id.insert(visit_id.to_string(), ordinal).is_some() {
                return Err(ProtocolError::DuplicateVisit(visit_id.to_string()));
            }
            if let Some(action_id) = action.action_id.as_deref() {
                if action_table.insert(action_id, ordinal).is_some() {
                    return Err(ProtocolError::DuplicateActionId(action_id.to_string()));
                }
            }

            let mut plan = VisitPlan::new(visit_id, ordinal);
            plan.title = action.title.clone();
            plan.action_id = action.action_id.clone();
            plans.push(plan);
        }

        // Pass 2: resolve related actions through the table.
        let mut index_ordinals: Vec<usize> = Vec::new();

        for (ordinal, action) in actions.iter().enumerate() {
            // Later descriptors overwrite earlier ones on the same plan.
            for related in &action.related {
                let visit_id = plans[ordinal].visit_id.clone();
                let target = *action_table
                    .get(related.target_action_id.as_str())
                    .ok_or_else(|| ProtocolError::UnresolvedRelatedAction {
                        visit_id: visit_id.clone(),
                        action_id: related.target_action_id.clone(),
                    })?;
                if target == ordinal {
                    return Err(ProtocolError::SelfReference(visit_id));
                }

                let mut approximate = false;
                for offset in [&related.offset_low, &related.offset_high].into_iter().flatten() {
                    approximate |= check_offset(&visit_id, offset, options.unit_policy)?;
                }
                check_ordering(
                    &visit_id,
                    related.offset_low.as_ref(),
                    related.offset_high.as_ref(),
                )?;

                let target_visit = plans[target].visit_id.clone();
                let plan = &mut plans[ordinal];
                plan.related_visit_id = Some(target_visit);
                plan.relationship = Some(related.relationship);
                plan.offset_low = related.offset_low.clone();
                plan.offset_high = related.offset_high.clone();
                plan.approximate_units = approximate;

                if !index_ordinals.contains(&target) {
                    index_ordinals.push(target);
                }
            }
        }

        for ordinal in index_ordinals {
            plans[ordinal].is_index = true;
        }

        let graph = Self { plans, by_id };
        graph.index_visit()?;
        Ok(graph)
    }

    /// Assembles a graph from already-built plans without re-deriving the index.
    ///
    /// Plans are ordered by ordinal. Index uniqueness is not checked here; call
    /// [`index_visit`](Self::index_visit) or [`validate`](Self::validate).
    pub fn from_plans(plans: impl IntoIterator<Item = VisitPlan>) -> ProtocolResult<Self> {
        let mut plans: Vec<VisitPlan> = plans.into_iter().collect();
        plans.sort_by_key(|p| p.ordinal);

        let mut by_id = HashMap::with_capacity(plans.len());
        for (position, plan) in plans.iter().enumerate() {
            if by_id.insert(plan.visit_id.clone(), position).is_some() {
                return Err(ProtocolError::DuplicateVisit(plan.visit_id.clone()));
            }
        }
        Ok(Self { plans, by_id })
    }

    /// Returns the unique index plan.
    ///
    /// Fails when zero or several plans are flagged as index.
    pub fn index_visit(&self) -> ProtocolResult<&VisitPlan> {
        let mut indexes = self.plans.iter().filter(|p| p.is_index);
        match (indexes.next(), indexes.next()) {
            (None, _) => Err(ProtocolError::NoIndexVisit),
            (Some(index), None) => Ok(index),
            (Some(first), Some(second)) => {
                let mut visit_ids = vec![first.visit_id.clone(), second.visit_id.clone()];
                visit_ids.extend(indexes.map(|p| p.visit_id.clone()));
                Err(ProtocolError::MultipleIndexVisits { visit_ids })
            }
        }
    }

    /// Checks the structural invariants of the graph.
    ///
    /// Offsets are held to the same bounds and ordering as during the build.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.plans.is_empty() {
            return Err(ProtocolError::EmptyProtocol);
        }
        self.index_visit()?;
        for plan in &self.plans {
            if let Some(related) = plan.related_visit_id.as_deref() {
                if !self.by_id.contains_key(related) {
                    return Err(ProtocolError::UnresolvedRelatedAction {
                        visit_id: plan.visit_id.clone(),
                        action_id: related.to_string(),
                    });
                }
            }
            for offset in [&plan.offset_low, &plan.offset_high].into_iter().flatten() {
                check_magnitude(&plan.visit_id, offset)?;
            }
            check_ordering(
                &plan.visit_id,
                plan.offset_low.as_ref(),
                plan.offset_high.as_ref(),
            )?;
        }
        Ok(())
    }

    /// Gets a plan by visit identity.
    pub fn get(&self, visit_id: &str) -> Option<&VisitPlan> {
        self.by_id.get(visit_id).map(|&i| &self.plans[i])
    }

    /// Checks whether a visit belongs to the protocol.
    pub fn contains(&self, visit_id: &str) -> bool {
        self.by_id.contains_key(visit_id)
    }

    /// Returns the number of visits.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Returns true if the graph has no visits.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Iterates plans in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &VisitPlan> {
        self.plans.iter()
    }

    /// Iterates visit identities in declared order.
    pub fn visit_ids(&self) -> impl Iterator<Item = &str> {
        self.plans.iter().map(|p| p.visit_id.as_str())
    }

    /// Consumes the graph into a map keyed by visit identity.
    pub fn into_map(self) -> HashMap<String, VisitPlan> {
        self.plans
            .into_iter()
            .map(|p| (p.visit_id.clone(), p))
            .collect()
    }
}

impl<'a> IntoIterator for &'a ProtocolGraph {
    type Item = &'a VisitPlan;
    type IntoIter = std::slice::Iter<'a, VisitPlan>;

    fn into_iter(self) -> Self::IntoIter {
        self.plans.iter()
    }
}

/// Validates an offset. Returns true when its unit was approximated as days.
fn check_offset(visit_id: &str, offset: &Offset, policy: UnitPolicy) -> ProtocolResult<bool> {
    check_magnitude(visit_id, offset)?;
    if offset.unit.is_day() {
        return Ok(false);
    }
    match policy {
        UnitPolicy::Reject => Err(ProtocolError::UnsupportedUnit {
            visit_id: visit_id.to_string(),
            unit: offset.unit.code().to_string(),
        }),
        UnitPolicy::ApproximateAsDays => {
            warn!(
                visit_id,
                unit = offset.unit.code(),
                value = offset.value,
                "offset unit is not days; reading magnitude as days"
            );
            Ok(true)
        }
    }
}

/// Offsets are magnitudes; the relationship supplies the direction.
fn check_magnitude(visit_id: &str, offset: &Offset) -> ProtocolResult<()> {
    if !(0..=MAX_OFFSET_DAYS).contains(&offset.value) {
        return Err(ProtocolError::OffsetOutOfRange {
            visit_id: visit_id.to_string(),
            value: offset.value,
        });
    }
    Ok(())
}

fn check_ordering(
    visit_id: &str,
    low: Option<&Offset>,
    high: Option<&Offset>,
) -> ProtocolResult<()> {
    match (low, high) {
        (Some(low), Some(high)) if low.value > high.value => Err(ProtocolError::InvertedOffset {
            visit_id: visit_id.to_string(),
            low: low.value,
            high: high.value,
        }),
        _ => Ok(()),
    }
}
