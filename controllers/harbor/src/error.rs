//! Controller-specific error types.
//!
//! Every error a reconciliation pass can hit is a `ControllerError`. The pass
//! never returns one to the runtime; instead `kind()` sorts it into one of four
//! classes and the framework turns the class into conditions and a requeue
//! decision:
//!
//! | kind          | condition                | requeue                 |
//! |---------------|--------------------------|-------------------------|
//! | `Validation`  | `Failed`                 | none                    |
//! | `Referential` | `Failed`                 | fixed medium delay      |
//! | `Transient`   | `InProgress`             | exponential backoff     |
//! | `Permanent`   | `Failed`                 | none                    |

use crate::graph::GraphError;
use cluster_client::ClusterClientError;
use crds::secret_types::SecretTypeError;
use crds::{FieldPath, ValidationErrors};
use kube::Error as KubeError;
use std::time::Duration;
use thiserror::Error;

/// Error classes driving status and requeue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User input breaks a local rule
    Validation,
    /// A referenced object is missing or has the wrong shape
    Referential,
    /// The API server or a deadline failed us; retrying may help
    Transient,
    /// A bug; retrying will not help
    Permanent,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Referential => "referential",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        }
    }
}

/// Errors that can occur in the Harbor operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// API server access through the cluster client
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterClientError),

    /// Kubernetes client setup or watch error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Spec failed defaulting or invariant checks
    #[error("Invalid spec: {0}")]
    InvalidSpec(ValidationErrors),

    /// Referenced secret does not exist
    #[error("secret {name:?} referenced by {field} does not exist")]
    ReferenceMissing { field: FieldPath, name: String },

    /// Referenced secret exists with the wrong type or keys
    #[error("{field}: {source}")]
    ReferenceTypeMismatch {
        field: FieldPath,
        #[source]
        source: SecretTypeError,
    },

    /// A resource the pass reads (not a secret) is missing
    #[error("{kind} {name:?} not found")]
    MissingResource { kind: String, name: String },

    /// Work graph construction failed
    #[error("Invalid work graph: {0}")]
    Graph(#[from] GraphError),

    /// A child object could not be rendered
    #[error("Render failed: {0}")]
    Render(String),

    /// A configuration template could not be read or filled in
    #[error("Template error: {0}")]
    Template(String),

    /// The pass ran past its deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),

    /// The pass was cancelled by shutdown
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// Invalid operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Webhook or health server failed
    #[error("Server error: {0}")]
    Server(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::InvalidSpec(_) => ErrorKind::Validation,
            ControllerError::ReferenceMissing { .. }
            | ControllerError::ReferenceTypeMismatch { .. }
            | ControllerError::MissingResource { .. } => ErrorKind::Referential,
            ControllerError::Cluster(e) if e.is_transient() => ErrorKind::Transient,
            ControllerError::Cluster(ClusterClientError::NotFound(_)) => {
                ErrorKind::Transient
            }
            ControllerError::Cluster(_) => ErrorKind::Permanent,
            ControllerError::Kube(_)
            | ControllerError::Timeout(_)
            | ControllerError::Cancelled
            | ControllerError::Io(_)
            | ControllerError::Watch(_)
            | ControllerError::Server(_) => ErrorKind::Transient,
            ControllerError::Serialization(_)
            | ControllerError::Graph(_)
            | ControllerError::Render(_)
            | ControllerError::Template(_)
            | ControllerError::InvalidConfig(_) => ErrorKind::Permanent,
        }
    }

    /// Condition reason recorded in status.
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::InvalidSpec(_) => "InvalidSpec",
            ControllerError::ReferenceMissing { .. } => "ReferenceMissing",
            ControllerError::ReferenceTypeMismatch { .. } => "ReferenceTypeMismatch",
            ControllerError::MissingResource { .. } => "DependencyMissing",
            ControllerError::Graph(_) => "InvalidGraph",
            ControllerError::Render(_) | ControllerError::Template(_) => "RenderFailed",
            ControllerError::Timeout(_) => "Timeout",
            ControllerError::Cancelled => "Cancelled",
            ControllerError::Cluster(_) | ControllerError::Kube(_) => "ApiError",
            ControllerError::Serialization(_) => "SerializationFailed",
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::Watch(_) | ControllerError::Server(_) | ControllerError::Io(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::FieldError;

    #[test]
    fn test_kinds() {
        let missing = ControllerError::ReferenceMissing {
            field: FieldPath::spec().child("harborAdminPasswordRef"),
            name: "admin-pw".to_string(),
        };
        assert_eq!(missing.kind(), ErrorKind::Referential);
        assert_eq!(missing.reason(), "ReferenceMissing");
        assert_eq!(
            missing.to_string(),
            "secret \"admin-pw\" referenced by spec.harborAdminPasswordRef does not exist"
        );

        let invalid = ControllerError::InvalidSpec(ValidationErrors::from(vec![FieldError::required(
            FieldPath::spec().child("redis"),
            "redis is required",
        )]));
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        let timeout = ControllerError::Cluster(ClusterClientError::Timeout("apply".to_string()));
        assert_eq!(timeout.kind(), ErrorKind::Transient);

        let bad_object = ControllerError::Cluster(ClusterClientError::InvalidObject("no name".to_string()));
        assert_eq!(bad_object.kind(), ErrorKind::Permanent);

        let cycle = ControllerError::Graph(GraphError::Cycle(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(cycle.kind(), ErrorKind::Permanent);
        assert_eq!(cycle.reason(), "InvalidGraph");
    }
}
