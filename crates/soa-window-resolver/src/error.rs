//! Error types for visit resolution.

use std::fmt;

use soa_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by a [`ClinicalDataGateway`](crate::ClinicalDataGateway).
///
/// Transport retry and backoff belong to the gateway; the resolver propagates
/// these unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The data source could not be reached or refused the request.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The data source answered with something that could not be interpreted.
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// The stage of a subject resolution at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStage {
    /// Loading or validating the protocol.
    Protocol,
    /// Looking up the subject.
    Subject,
    /// Establishing the anchor date from the index encounter.
    Anchor,
    /// Resolving an individual visit.
    Visit,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStage::Protocol => write!(f, "protocol"),
            ResolutionStage::Subject => write!(f, "subject"),
            ResolutionStage::Anchor => write!(f, "anchor"),
            ResolutionStage::Visit => write!(f, "visit"),
        }
    }
}

/// Errors that abort the resolution of a subject (or, for protocol errors,
/// of every subject).
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The protocol is structurally unusable.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The data source holds no protocol for the study.
    #[error("no protocol definition found for study {0}")]
    ProtocolNotFound(String),

    /// The subject is not enrolled in the study.
    #[error("subject {subject_id} not found in study {study_id}")]
    SubjectNotFound {
        /// The requested subject.
        subject_id: String,
        /// The study searched.
        study_id: String,
    },

    /// The subject has no encounter for the index visit, so no anchor exists.
    #[error("no index encounter for subject {subject_id} at visit {visit_id}")]
    IndexEncounterNotFound {
        /// The subject.
        subject_id: String,
        /// The index visit.
        visit_id: String,
    },

    /// The gateway failed during a lookup.
    #[error("gateway failure during {stage} stage: {source}")]
    Gateway {
        /// Stage at which the lookup was issued.
        stage: ResolutionStage,
        /// The underlying gateway error.
        #[source]
        source: GatewayError,
    },
}

impl ResolveError {
    /// Wraps a gateway error with the stage it occurred at.
    pub fn gateway(stage: ResolutionStage, source: GatewayError) -> Self {
        ResolveError::Gateway { stage, source }
    }

    /// Returns the stage at which resolution failed.
    pub fn stage(&self) -> ResolutionStage {
        match self {
            ResolveError::Protocol(_) | ResolveError::ProtocolNotFound(_) => {
                ResolutionStage::Protocol
            }
            ResolveError::SubjectNotFound { .. } => ResolutionStage::Subject,
            ResolveError::IndexEncounterNotFound { .. } => ResolutionStage::Anchor,
            ResolveError::Gateway { stage, .. } => *stage,
        }
    }

    /// Returns true if the failure affects every subject of the study.
    pub fn is_protocol_fatal(&self) -> bool {
        self.stage() == ResolutionStage::Protocol
    }
}

/// Result type for resolver operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
