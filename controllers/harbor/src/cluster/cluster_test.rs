use super::*;
use crate::components::testing;
use crate::config::{ConfigStore, OperatorConfig};
use crate::error::ErrorKind;
use crate::reconciler::{CLASS_LABEL, COMPONENT_LABEL, PassState, REFERENTIAL_REQUEUE, Reconciler};
use cluster_client::{ClusterClientTrait, MockClusterClient, ObjectKey, ResourceType};
use crds::{Certificate, Core, Issuer, JobService, Portal, Registry, RegistryController};
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use serde_json::json;
use std::sync::Arc;

fn cluster(extra: serde_json::Value) -> HarborCluster {
    let mut raw = json!({
        "externalURL": "https://harbor.example.com",
        "version": "2.4.0",
        "harborAdminPasswordRef": "admin",
        "database": {"hosts": [{"host": "db"}], "username": "harbor", "passwordRef": "db-pw"},
        "redis": {"host": "redis"},
        "imageChartStorage": {"filesystem": {"registryPersistentVolume": {"claimName": "registry"}}},
    });
    if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
        raw.extend(extra.clone());
    }
    let mut cluster = HarborCluster::new("demo", serde_json::from_value(raw).unwrap());
    cluster.metadata.namespace = Some("harbor".to_string());
    cluster
}

fn setup(cluster: &HarborCluster) -> MockClusterClient {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<HarborCluster>(), cluster);
    testing::insert_secret(
        &client,
        &testing::typed_secret("admin", "goharbor.io/single-secret", &[("secret", "Harbor12345")]),
    );
    testing::insert_secret(
        &client,
        &testing::typed_secret("db-pw", "goharbor.io/postgresql", &[("postgresql-password", "pw")]),
    );
    client
}

fn reconciler(client: &MockClusterClient) -> Reconciler<HarborCluster> {
    let client: Arc<dyn ClusterClientTrait> = Arc::new(client.clone());
    Reconciler::new(
        client,
        Arc::new(ConfigStore::from_config(OperatorConfig::default())),
        Arc::new(HarborClusterResources),
    )
}

fn names<K: Resource<DynamicType = ()>>(client: &MockClusterClient) -> Vec<String> {
    client
        .objects(&ResourceType::namespaced::<K>())
        .into_iter()
        .filter_map(|o| o.metadata.name)
        .collect()
}

fn mark_ready<K: Resource<DynamicType = ()>>(client: &MockClusterClient, name: &str) {
    client.set_status(
        &ObjectKey::new(ResourceType::namespaced::<K>(), Some("harbor"), name),
        json!({"observedGeneration": 1, "conditions": [{"type": "Ready", "status": "True"}]}),
    );
}

fn mark_issued(client: &MockClusterClient, name: &str) {
    client.set_status(
        &ObjectKey::new(ResourceType::namespaced::<Certificate>(), Some("harbor"), name),
        json!({"conditions": [{"type": "Ready", "status": "True"}]}),
    );
}

#[tokio::test]
async fn test_first_pass_creates_shared_resources_and_first_tier() {
    let client = setup(&cluster(json!({})));
    let outcome = reconciler(&client).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Pending);

    // Two user secrets plus the seven generated ones
    assert_eq!(names::<Secret>(&client).len(), 9);
    assert_eq!(names::<Issuer>(&client), vec!["demo-self-signed"]);
    assert_eq!(names::<Certificate>(&client), vec!["demo-token"]);
    assert_eq!(names::<Portal>(&client), vec!["demo-portal"]);
    assert!(names::<Registry>(&client).is_empty());
    assert!(names::<Core>(&client).is_empty());

    let portal = &client.objects(&ResourceType::namespaced::<Portal>())[0];
    let labels = portal.metadata.labels.as_ref().unwrap();
    assert_eq!(labels[COMPONENT_LABEL], "portal");
    assert_eq!(labels[CLASS_LABEL], "");
    let owner = &portal.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "HarborCluster");
    assert_eq!(owner.name, "demo");
}

#[tokio::test]
async fn test_tiers_start_once_the_previous_one_is_ready() {
    let client = setup(&cluster(json!({})));
    let reconciler = reconciler(&client);
    reconciler.reconcile("harbor", "demo").await;

    mark_ready::<Portal>(&client, "demo-portal");
    reconciler.reconcile("harbor", "demo").await;
    assert_eq!(names::<Registry>(&client), vec!["demo-registry"]);
    assert_eq!(names::<RegistryController>(&client), vec!["demo-registryctl"]);
    assert!(names::<Core>(&client).is_empty());

    // Core also waits for its token certificate.
    mark_ready::<Registry>(&client, "demo-registry");
    mark_ready::<RegistryController>(&client, "demo-registryctl");
    reconciler.reconcile("harbor", "demo").await;
    assert!(names::<Core>(&client).is_empty());
    assert_eq!(names::<JobService>(&client), vec!["demo-jobservice"]);

    mark_issued(&client, "demo-token");
    reconciler.reconcile("harbor", "demo").await;
    assert_eq!(names::<Core>(&client), vec!["demo-core"]);

    mark_ready::<Core>(&client, "demo-core");
    mark_ready::<JobService>(&client, "demo-jobservice");
    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Ready);
}

#[tokio::test]
async fn test_missing_admin_secret_is_referential() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<HarborCluster>(), &cluster(json!({})));
    let outcome = reconciler(&client).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Failed(ErrorKind::Referential));
    assert_eq!(outcome.requeue, Some(REFERENTIAL_REQUEUE));
    assert!(names::<Portal>(&client).is_empty());
}

#[tokio::test]
async fn test_other_class_is_skipped() {
    let mut blue = cluster(json!({}));
    blue.metadata.labels = Some([(CLASS_LABEL.to_string(), "blue".to_string())].into());
    let client = setup(&blue);
    let outcome = reconciler(&client).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Skipped);
    assert_eq!(client.write_count(), 0);
}

#[tokio::test]
async fn test_optional_components_join_their_tier() {
    let client = setup(&cluster(json!({"trivy": {}, "notary": {}, "chartmuseum": {}})));
    let reconciler = reconciler(&client);
    reconciler.reconcile("harbor", "demo").await;
    mark_ready::<Portal>(&client, "demo-portal");
    mark_issued(&client, "demo-token");
    mark_issued(&client, "demo-notary-signer");
    reconciler.reconcile("harbor", "demo").await;

    assert_eq!(names::<crds::Trivy>(&client), vec!["demo-trivy"]);
    assert_eq!(names::<crds::ChartMuseum>(&client), vec!["demo-chartmuseum"]);
    assert_eq!(names::<crds::NotarySigner>(&client), vec!["demo-notarysigner"]);
    // The server waits for its signer.
    assert!(names::<crds::NotaryServer>(&client).is_empty());
    assert_eq!(names::<Certificate>(&client).len(), 2);
}
