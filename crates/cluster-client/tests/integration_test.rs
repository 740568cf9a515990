//! Integration tests for the API server backed client
//!
//! These tests require a reachable cluster (kubeconfig or in-cluster).
//! Run with `--ignored`.

use cluster_client::{ClusterClient, ClusterClientTrait, ObjectKey, ResourceType, get_typed, to_dynamic};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_apply_get_delete_config_map() {
    let client = ClusterClient::try_default("harbor-operator-test")
        .await
        .expect("Failed to create client");
    let namespace = std::env::var("TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string());

    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some("cluster-client-it".to_string()),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("KEY".to_string(), "value".to_string())])),
        ..Default::default()
    };
    let resource = ResourceType::namespaced::<ConfigMap>();
    client
        .apply(&resource, &to_dynamic(&cm).expect("serializable"))
        .await
        .expect("apply failed");

    let key = ObjectKey::new(resource, Some(&namespace), "cluster-client-it");
    let stored: Option<ConfigMap> = get_typed(&client, &key).await.expect("get failed");
    assert_eq!(stored.and_then(|c| c.data).map(|d| d["KEY"].clone()), Some("value".to_string()));

    client.delete(&key).await.expect("delete failed");
}
