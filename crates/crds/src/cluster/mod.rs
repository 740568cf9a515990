//! HarborCluster CRD
//!
//! The user-facing aggregate: one resource describing a whole Harbor
//! installation. `v1beta1` is the hub (storage) version; `v1alpha3` is kept
//! for existing objects and converted through the hub.

pub mod v1alpha3;
pub mod v1beta1;

/// Annotation carrying `v1alpha3`-only fields across a round trip through the hub.
pub const V1ALPHA3_PRIORITY_ANNOTATION: &str = "goharbor.io/v1alpha3-priority";
