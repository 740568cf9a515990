use super::*;
use crate::components::portal::PortalResources;
use crds::{ConditionType, Portal, PortalSpec};
use cluster_client::MockClusterClient;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

fn portal(name: &str, labels: &[(&str, &str)]) -> Portal {
    let mut portal = Portal::new(
        name,
        PortalSpec {
            component: Default::default(),
            tls: None,
            network: None,
            max_connections: 1024,
        },
    );
    portal.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("harbor".to_string()),
        labels: (!labels.is_empty()).then(|| {
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        }),
        ..Default::default()
    };
    portal
}

fn reconciler(client: &MockClusterClient, config: OperatorConfig) -> Reconciler<Portal> {
    let client: Arc<dyn ClusterClientTrait> = Arc::new(client.clone());
    Reconciler::new(client, Arc::new(ConfigStore::from_config(config)), Arc::new(PortalResources))
}

fn stored_portal(client: &MockClusterClient, name: &str) -> Portal {
    client
        .objects(&ResourceType::namespaced::<Portal>())
        .into_iter()
        .find(|o| o.metadata.name.as_deref() == Some(name))
        .map(|o| cluster_client::from_dynamic(o).unwrap())
        .unwrap()
}

fn deployment_key(name: &str) -> ObjectKey {
    ObjectKey::new(ResourceType::namespaced::<Deployment>(), Some("harbor"), name)
}

fn mark_rolled_out(client: &MockClusterClient, name: &str) {
    client.set_status(
        &deployment_key(name),
        json!({"observedGeneration": 1, "availableReplicas": 1, "replicas": 1}),
    );
}

#[tokio::test]
async fn test_absent_aggregate_needs_no_work() {
    let client = MockClusterClient::new();
    let outcome = reconciler(&client, OperatorConfig::default()).reconcile("harbor", "gone").await;
    assert_eq!(outcome.state, PassState::Absent);
    assert_eq!(outcome.requeue, None);
    assert_eq!(client.write_count(), 0);
}

#[tokio::test]
async fn test_first_pass_creates_children_and_reports_progress() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<Portal>(), &portal("demo", &[]));
    let reconciler = reconciler(&client, OperatorConfig::default());

    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Pending);
    assert_eq!(outcome.requeue, Some(PROGRESS_MIN));

    assert_eq!(client.objects(&ResourceType::namespaced::<ConfigMap>()).len(), 1);
    assert_eq!(client.objects(&ResourceType::namespaced::<Deployment>()).len(), 1);
    assert_eq!(client.objects(&ResourceType::namespaced::<Service>()).len(), 1);

    let deployment = &client.objects(&ResourceType::namespaced::<Deployment>())[0];
    let owner = &deployment.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "Portal");
    assert_eq!(owner.controller, Some(true));
    let labels = deployment.metadata.labels.as_ref().unwrap();
    assert_eq!(labels[COMPONENT_LABEL], "portal");
    assert_eq!(labels[INSTANCE_LABEL], "demo");

    let status = stored_portal(&client, "demo").status.unwrap();
    assert!(status.is_condition_true(ConditionType::InProgress));
    assert!(!status.is_condition_true(ConditionType::Ready));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.children.len(), 3);
}

#[tokio::test]
async fn test_ready_once_rolled_out_then_idempotent() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<Portal>(), &portal("demo", &[]));
    let reconciler = reconciler(&client, OperatorConfig::default());

    reconciler.reconcile("harbor", "demo").await;
    mark_rolled_out(&client, "demo");

    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Ready);
    assert_eq!(outcome.requeue, None);
    let status = stored_portal(&client, "demo").status.unwrap();
    assert!(status.is_ready_at(Some(1)));
    assert_eq!(status.replicas, Some(1));
    assert!(status.children.iter().all(|c| c.ready));

    let writes = client.write_count();
    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Ready);
    assert_eq!(client.write_count(), writes, "a converged pass must not write");
}

#[tokio::test]
async fn test_key_dropped_from_rendered_config_is_removed() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<Portal>(), &portal("demo", &[]));
    let reconciler = reconciler(&client, OperatorConfig::default());
    reconciler.reconcile("harbor", "demo").await;

    // As if an earlier operator release also rendered a proxy setting.
    let mut stale = client.objects(&ResourceType::namespaced::<ConfigMap>()).remove(0);
    stale.data["data"]["HTTP_PROXY"] = json!("http://proxy:3128");
    let stale = diff::with_applied_hash(&stale).unwrap();
    client.apply(&ResourceType::namespaced::<ConfigMap>(), &stale).await.unwrap();

    reconciler.reconcile("harbor", "demo").await;
    let config = &client.objects(&ResourceType::namespaced::<ConfigMap>())[0];
    assert!(config.data["data"].get("HTTP_PROXY").is_none());
    assert!(config.data["data"].get("nginx.conf").is_some());
}

#[tokio::test]
async fn test_other_class_is_skipped() {
    let client = MockClusterClient::new();
    client.insert(
        &ResourceType::namespaced::<Portal>(),
        &portal("demo", &[(CLASS_LABEL, "blue")]),
    );
    let outcome = reconciler(&client, OperatorConfig::default()).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Skipped);
    assert_eq!(client.write_count(), 0);

    let config = OperatorConfig::parse("classname: blue").unwrap();
    let outcome = reconciler(&client, config).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Pending);
}

#[tokio::test]
async fn test_missing_certificate_is_referential() {
    let client = MockClusterClient::new();
    let mut tls_portal = portal("demo", &[]);
    tls_portal.spec.tls = Some(crds::ComponentTls {
        certificate_ref: "portal-tls".to_string(),
    });
    client.insert(&ResourceType::namespaced::<Portal>(), &tls_portal);

    let outcome = reconciler(&client, OperatorConfig::default()).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Failed(ErrorKind::Referential));
    assert_eq!(outcome.requeue, Some(REFERENTIAL_REQUEUE));
    assert!(client.objects(&ResourceType::namespaced::<Deployment>()).is_empty());

    let status = stored_portal(&client, "demo").status.unwrap();
    let failed = status.condition(ConditionType::Failed).unwrap();
    assert!(failed.is_true());
    assert_eq!(failed.reason.as_deref(), Some("ReferenceMissing"));
    assert!(failed.message.as_deref().unwrap().contains("portal-tls"));
}

#[tokio::test]
async fn test_invalid_spec_is_not_retried() {
    let client = MockClusterClient::new();
    let mut invalid = portal("demo", &[]);
    invalid.spec.max_connections = 0;
    client.insert(&ResourceType::namespaced::<Portal>(), &invalid);

    let outcome = reconciler(&client, OperatorConfig::default()).reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Failed(ErrorKind::Validation));
    assert_eq!(outcome.requeue, None);
    let status = stored_portal(&client, "demo").status.unwrap();
    assert_eq!(
        status.condition(ConditionType::Failed).unwrap().reason.as_deref(),
        Some("InvalidSpec")
    );
}

#[tokio::test]
async fn test_transient_write_failure_backs_off_then_recovers() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<Portal>(), &portal("demo", &[]));
    let reconciler = reconciler(&client, OperatorConfig::default());

    client.fail_next_writes(1);
    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Failed(ErrorKind::Transient));
    assert_eq!(outcome.requeue, Some(TRANSIENT_MIN));
    // The deployment waits for its ConfigMap.
    assert!(client.objects(&ResourceType::namespaced::<Deployment>()).is_empty());

    client.fail_next_writes(1);
    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.requeue, Some(TRANSIENT_MIN * 2));

    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Pending);
    assert_eq!(client.objects(&ResourceType::namespaced::<Deployment>()).len(), 1);
}

#[tokio::test]
async fn test_cancelled_pass_reports_transient() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<Portal>(), &portal("demo", &[]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let reconciler = reconciler(&client, OperatorConfig::default()).with_cancellation(cancel);

    let outcome = reconciler.reconcile("harbor", "demo").await;
    assert_eq!(outcome.state, PassState::Failed(ErrorKind::Transient));
    assert_eq!(client.write_count(), 0);
}
