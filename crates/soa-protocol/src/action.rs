//! Raw protocol actions as declared by a protocol definition.
//!
//! These types mirror the shape of a plan definition's action list before any
//! identity resolution: related actions point at *local* action ids, and the
//! true visit identity is the action's definition reference.

use std::fmt;

// =============================================================================
// Duration units
// =============================================================================

/// Unit of an offset duration.
///
/// Only [`DurationUnit::Day`] has defined window arithmetic. Other units are
/// carried so that the builder can reject them, or approximate them as days
/// when configured to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DurationUnit {
    /// Calendar days (`d`).
    #[default]
    Day,
    /// Weeks (`wk`).
    Week,
    /// Months (`mo`).
    Month,
    /// Years (`a`).
    Year,
    /// Hours (`h`).
    Hour,
    /// Minutes (`min`).
    Minute,
    /// Any other unit code.
    Other(String),
}

impl DurationUnit {
    /// Parses a UCUM-style unit code. An absent code means days.
    pub fn from_code(code: Option<&str>) -> Self {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return DurationUnit::Day;
        };
        match code.to_ascii_lowercase().as_str() {
            "d" | "day" | "days" => DurationUnit::Day,
            "wk" | "w" | "week" | "weeks" => DurationUnit::Week,
            "mo" | "month" | "months" => DurationUnit::Month,
            "a" | "y" | "yr" | "year" | "years" => DurationUnit::Year,
            "h" | "hr" | "hour" | "hours" => DurationUnit::Hour,
            "min" | "minute" | "minutes" => DurationUnit::Minute,
            _ => DurationUnit::Other(code.to_string()),
        }
    }

    /// Returns true for day granularity.
    pub fn is_day(&self) -> bool {
        matches!(self, DurationUnit::Day)
    }

    /// Returns the canonical unit code.
    pub fn code(&self) -> &str {
        match self {
            DurationUnit::Day => "d",
            DurationUnit::Week => "wk",
            DurationUnit::Month => "mo",
            DurationUnit::Year => "a",
            DurationUnit::Hour => "h",
            DurationUnit::Minute => "min",
            DurationUnit::Other(code) => code,
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An offset magnitude: how far a visit sits from the visit it relates to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Offset {
    /// Magnitude of the offset.
    pub value: i64,
    /// Unit of the magnitude.
    pub unit: DurationUnit,
}

impl Offset {
    /// Creates an offset with an explicit unit.
    pub fn new(value: i64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    /// Creates an offset measured in days.
    pub fn days(value: i64) -> Self {
        Self::new(value, DurationUnit::Day)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

// =============================================================================
// Relationships
// =============================================================================

/// Direction of an offset relative to the visit it relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relationship {
    /// The visit happens before the related visit.
    Before,
    /// The visit happens after the related visit.
    After,
}

impl Relationship {
    /// Parses a plan-definition relationship code.
    ///
    /// The start/end qualified variants collapse onto their direction, since
    /// windows are computed at day granularity from the anchor's start date.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "before" | "before-start" | "before-end" => Some(Relationship::Before),
            "after" | "after-start" | "after-end" => Some(Relationship::After),
            _ => None,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Before => write!(f, "before"),
            Relationship::After => write!(f, "after"),
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// A related-action descriptor attached to a raw action.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelatedAction {
    /// Local id of the action this one is relative to.
    pub target_action_id: String,
    /// Direction of the offset.
    pub relationship: Relationship,
    /// Lower offset magnitude.
    pub offset_low: Option<Offset>,
    /// Upper offset magnitude.
    pub offset_high: Option<Offset>,
}

impl RelatedAction {
    /// Creates a descriptor with a day-valued offset range.
    pub fn days(
        target_action_id: impl Into<String>,
        relationship: Relationship,
        low: Option<i64>,
        high: Option<i64>,
    ) -> Self {
        Self {
            target_action_id: target_action_id.into(),
            relationship,
            offset_low: low.map(Offset::days),
            offset_high: high.map(Offset::days),
        }
    }
}

/// One action in the protocol's declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawAction {
    /// Local action id, used only by related-action references.
    pub action_id: Option<String>,
    /// Definition reference: the visit's true identity.
    pub definition_uri: String,
    /// Human readable title, if the definition carries one.
    pub title: Option<String>,
    /// Related-action descriptors.
    pub related: Vec<RelatedAction>,
}

impl RawAction {
    /// Creates an action with no local id and no relations.
    pub fn new(definition_uri: impl Into<String>) -> Self {
        Self {
            action_id: None,
            definition_uri: definition_uri.into(),
            title: None,
            related: Vec::new(),
        }
    }

    /// Sets the local action id.
    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Adds a related-action descriptor.
    pub fn with_related(mut self, related: RelatedAction) -> Self {
        self.related.push(related);
        self
    }
}

/// A protocol definition as returned by the clinical data source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolDefinition {
    /// Identifier of the protocol resource.
    pub id: String,
    /// Version of the protocol, when declared.
    pub version: Option<String>,
    /// Actions in declared order.
    pub actions: Vec<RawAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_defaults_to_day() {
        assert_eq!(DurationUnit::from_code(None), DurationUnit::Day);
        assert_eq!(DurationUnit::from_code(Some("")), DurationUnit::Day);
        assert_eq!(DurationUnit::from_code(Some("  ")), DurationUnit::Day);
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(DurationUnit::from_code(Some("d")), DurationUnit::Day);
        assert_eq!(DurationUnit::from_code(Some("Days")), DurationUnit::Day);
        assert_eq!(DurationUnit::from_code(Some("wk")), DurationUnit::Week);
        assert_eq!(DurationUnit::from_code(Some("mo")), DurationUnit::Month);
        assert_eq!(DurationUnit::from_code(Some("a")), DurationUnit::Year);
        assert_eq!(
            DurationUnit::from_code(Some("fortnight")),
            DurationUnit::Other("fortnight".to_string())
        );
        assert_eq!(DurationUnit::Week.code(), "wk");
        assert!(!DurationUnit::Week.is_day());
    }

    #[test]
    fn test_relationship_codes() {
        assert_eq!(Relationship::from_code("after"), Some(Relationship::After));
        assert_eq!(
            Relationship::from_code("after-end"),
            Some(Relationship::After)
        );
        assert_eq!(
            Relationship::from_code("Before-Start"),
            Some(Relationship::Before)
        );
        assert_eq!(Relationship::from_code("concurrent"), None);
    }

    #[test]
    fn test_raw_action_builder() {
        let action = RawAction::new("PlanDefinition/V2")
            .with_action_id("a2")
            .with_related(RelatedAction::days("a1", Relationship::After, Some(7), None));

        assert_eq!(action.action_id.as_deref(), Some("a2"));
        assert_eq!(action.related.len(), 1);
        assert_eq!(action.related[0].offset_low, Some(Offset::days(7)));
        assert!(action.related[0].offset_high.is_none());
    }

    #[test]
    fn test_offset_display() {
        assert_eq!(Offset::days(14).to_string(), "14 d");
        assert_eq!(Offset::new(2, DurationUnit::Week).to_string(), "2 wk");
    }
}
