//! Error types for protocol graph construction.

use thiserror::Error;

/// Errors that make a protocol structurally unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The protocol declares no actions.
    #[error("protocol has no actions")]
    EmptyProtocol,

    /// An action has no definition reference.
    #[error("action at position {ordinal} has no definition reference")]
    MissingDefinition {
        /// Position of the action in the declared order.
        ordinal: usize,
    },

    /// Two actions share the same definition reference.
    #[error("duplicate visit definition: {0}")]
    DuplicateVisit(String),

    /// Two actions share the same local action id.
    #[error("duplicate action id: {0}")]
    DuplicateActionId(String),

    /// No action is referenced as the anchor of any other action.
    #[error("no index visit could be identified")]
    NoIndexVisit,

    /// More than one distinct action is referenced as an anchor.
    #[error("multiple index visits: {}", visit_ids.join(", "))]
    MultipleIndexVisits {
        /// The competing index visits, in declared order.
        visit_ids: Vec<String>,
    },

    /// A related action references a local id that no action declares.
    #[error("visit {visit_id} references unknown action id {action_id}")]
    UnresolvedRelatedAction {
        /// The visit carrying the dangling reference.
        visit_id: String,
        /// The unresolved local action id.
        action_id: String,
    },

    /// An action declares itself as its own anchor.
    #[error("visit {0} is related to itself")]
    SelfReference(String),

    /// A related action uses a relationship code with no window semantics.
    #[error("visit {visit_id} uses unsupported relationship {code}")]
    UnsupportedRelationship {
        /// The visit carrying the relationship.
        visit_id: String,
        /// The relationship code as declared.
        code: String,
    },

    /// An offset is expressed in a unit other than days.
    #[error("visit {visit_id} uses unsupported offset unit {unit}")]
    UnsupportedUnit {
        /// The visit carrying the offset.
        visit_id: String,
        /// The unit code as declared.
        unit: String,
    },

    /// The low offset magnitude exceeds the high one.
    #[error("visit {visit_id} has inverted offsets: low {low} > high {high}")]
    InvertedOffset {
        /// The visit carrying the offsets.
        visit_id: String,
        /// Low magnitude.
        low: i64,
        /// High magnitude.
        high: i64,
    },

    /// An offset magnitude is negative or larger than [`MAX_OFFSET_DAYS`](crate::MAX_OFFSET_DAYS).
    #[error("visit {visit_id} has offset {value} outside the supported range")]
    OffsetOutOfRange {
        /// The visit carrying the offset.
        visit_id: String,
        /// The offending magnitude.
        value: i64,
    },
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
