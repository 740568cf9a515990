//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the API server
#[derive(Debug, Error)]
pub enum ClusterClientError {
    /// Any other API server or transport failure
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write lost a race with another writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// API server throttled or timed out the request
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Object is missing fields the operation needs
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterClientError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterClientError::Conflict(_) | ClusterClientError::Timeout(_) => true,
            ClusterClientError::Kube(kube::Error::Api(ae)) => ae.code == 429 || ae.code >= 500,
            ClusterClientError::Kube(_) => true,
            _ => false,
        }
    }

    /// Maps API status codes onto the typed variants.
    pub(crate) fn from_kube(error: kube::Error, what: &str) -> Self {
        let code = match &error {
            kube::Error::Api(ae) => ae.code,
            _ => return ClusterClientError::Kube(error),
        };
        match code {
            404 => ClusterClientError::NotFound(what.to_string()),
            409 => ClusterClientError::Conflict(format!("{what}: {error}")),
            429 | 504 => ClusterClientError::Timeout(format!("{what}: {error}")),
            _ => ClusterClientError::Kube(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClusterClientError::Conflict("x".to_string()).is_transient());
        assert!(ClusterClientError::Timeout("x".to_string()).is_transient());
        assert!(!ClusterClientError::NotFound("x".to_string()).is_transient());
        assert!(!ClusterClientError::InvalidObject("x".to_string()).is_transient());
    }
}
