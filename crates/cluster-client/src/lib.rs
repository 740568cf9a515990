//! Kubernetes API access for the Harbor operator
//!
//! Reconcilers and the admission webhook never hold a `kube::Api` directly.
//! They talk to a [`ClusterClientTrait`], which works on untyped
//! [`DynamicObject`](kube::core::DynamicObject)s addressed by an [`ObjectKey`]:
//!
//! - [`ClusterClient`] is backed by a live API server and applies objects
//!   with server-side apply.
//! - `MockClusterClient` (feature `test-util`) keeps objects in memory, tracks
//!   uid and generation, cascades deletes through owner references, and can be
//!   told to fail writes.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, ClusterClientTrait, ObjectKey, ResourceType};
//! use k8s_openapi::api::core::v1::Secret;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::try_default("harbor-operator").await?;
//! let key = ObjectKey::new(ResourceType::namespaced::<Secret>(), Some("harbor"), "admin-pw");
//! let secret: Option<Secret> = cluster_client::get_typed(&client, &key).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod object;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::ClusterClient;
pub use cluster_trait::{ClusterClientTrait, get_typed, list_typed};
pub use error::ClusterClientError;
pub use object::{ObjectKey, ResourceType, from_dynamic, key_of, to_dynamic};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterClient;
