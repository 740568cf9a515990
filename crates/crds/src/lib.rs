//! Harbor Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Harbor operator, together with
//! the logic that belongs to the schema itself:
//!
//! - defaults (`Defaults`) and local invariants (`Invariants`) of every spec
//! - admission rules for create and update (`validation`)
//! - conversion between the stored `HarborCluster` versions (`conversion`)
//! - the closed set of secret types the components consume (`secret_types`)
//!
//! Nothing in this crate talks to the API server; referential checks live in
//! the controllers.

pub mod binding;
pub mod certificate;
pub mod cluster;
pub mod common;
pub mod component;
pub mod components;
pub mod conditions;
pub mod conversion;
pub mod database;
pub mod duration;
pub mod expose;
pub mod field;
pub mod proxy;
pub mod redis;
pub mod references;
pub mod secret_types;
pub mod storage;
pub mod trace;
pub mod validation;
pub mod version;

pub use binding::*;
pub use certificate::{Certificate, CertificateSpec, Issuer, IssuerSpec};
pub use cluster::v1beta1::{HarborCluster, HarborClusterSpec};
pub use common::*;
pub use component::ComponentName;
pub use components::*;
pub use conditions::*;
pub use database::*;
pub use duration::{DurationError, GoDuration};
pub use expose::*;
pub use field::{FieldError, FieldErrorKind, FieldPath, ValidationErrors};
pub use proxy::*;
pub use redis::*;
pub use references::*;
pub use secret_types::SecretType;
pub use storage::*;
pub use trace::*;

/// API group of every Harbor operator resource.
pub const GROUP: &str = "goharbor.io";

/// Version all component kinds and the hub `HarborCluster` are stored in.
pub const HUB_VERSION: &str = "v1beta1";

/// Fills unspecified fields with their declared defaults.
///
/// Implementations must be idempotent: applying defaults twice yields the same
/// value as applying them once.
pub trait Defaults {
    /// Fill in every unspecified field in place.
    fn apply_defaults(&mut self);
}

/// Local invariant checks that never follow references.
pub trait Invariants {
    /// Returns every violation found, each carrying its field path.
    fn invariants(&self) -> Vec<FieldError>;
}

/// Returns a defaulted copy of `spec`.
pub fn defaults_for<T: Defaults + Clone>(spec: &T) -> T {
    let mut defaulted = spec.clone();
    defaulted.apply_defaults();
    defaulted
}
