//! Error types for the bundle crate.

use std::path::PathBuf;

use soa_protocol::ProtocolError;

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors that can occur while loading a FHIR bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// I/O error while reading a bundle file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The input is not valid JSON, or not shaped like a bundle.
    #[error("invalid bundle JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level resource is not a Bundle.
    #[error("expected a Bundle, found resourceType {0}")]
    NotABundle(String),

    /// A resource required for resolution cannot be interpreted.
    #[error("invalid {resource_type} {id}: {message}")]
    InvalidResource {
        /// FHIR resource type.
        resource_type: &'static str,
        /// Resource id (empty if absent).
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// A study's protocol PlanDefinition does not form a usable protocol.
    #[error("protocol error in PlanDefinition {id}: {source}")]
    Protocol {
        /// The PlanDefinition id.
        id: String,
        /// The underlying protocol error.
        #[source]
        source: ProtocolError,
    },
}

impl BundleError {
    /// Creates an I/O error with path context.
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-resource error.
    pub fn invalid(
        resource_type: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidResource {
            resource_type,
            id: id.into(),
            message: message.into(),
        }
    }
}
