//! References from Harbor resources to other objects
//!
//! Resources point at secrets by name, in their own namespace. Each reference
//! carries the type the secret must have so the reconcilers can check
//! presence and shape before deploying anything that mounts it.

use crate::field::FieldPath;
use crate::secret_types::SecretType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a cert-manager issuer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerReference {
    pub name: String,

    /// `Issuer` or `ClusterIssuer` (defaults to `Issuer`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Defaults to `cert-manager.io`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IssuerReference {
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some("Issuer".to_string()),
            group: Some("cert-manager.io".to_string()),
        }
    }
}

/// What a referenced secret must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedSecret {
    Typed(SecretType),
    Tls,
    /// Any secret carrying `ca.crt`
    CaBundle,
}

/// A secret a resource depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub field: FieldPath,
    pub name: String,
    pub expected: ExpectedSecret,
}

impl SecretReference {
    pub fn typed(field: FieldPath, name: impl Into<String>, secret_type: SecretType) -> Self {
        Self {
            field,
            name: name.into(),
            expected: ExpectedSecret::Typed(secret_type),
        }
    }

    pub fn tls(field: FieldPath, name: impl Into<String>) -> Self {
        Self {
            field,
            name: name.into(),
            expected: ExpectedSecret::Tls,
        }
    }

    pub fn ca_bundle(field: FieldPath, name: impl Into<String>) -> Self {
        Self {
            field,
            name: name.into(),
            expected: ExpectedSecret::CaBundle,
        }
    }
}

/// Resources that depend on secrets in their namespace.
pub trait SecretReferences {
    fn secret_references(&self) -> Vec<SecretReference>;
}
