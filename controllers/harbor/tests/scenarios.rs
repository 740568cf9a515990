//! End-to-end scenarios against the in-memory cluster client.
//!
//! The cluster controller and every component controller run in lock step;
//! the tests play the parts of cert-manager and the Deployment controller.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cluster_client::{ClusterClientTrait, MockClusterClient, ObjectKey, ResourceType};
use crds::{
    Certificate, ConditionType, Core, HarborCluster, HarborServerConfiguration, JobService, Portal, Registry,
    RegistryController,
};
use harbor_operator::cluster::HarborClusterResources;
use harbor_operator::components::core::CoreResources;
use harbor_operator::components::jobservice::JobServiceResources;
use harbor_operator::components::portal::PortalResources;
use harbor_operator::components::registry::RegistryResources;
use harbor_operator::components::registryctl::RegistryControllerResources;
use harbor_operator::config::{ConfigStore, OperatorConfig};
use harbor_operator::metrics::Metrics;
use harbor_operator::reconciler::{Aggregate, Reconciler, ResourceBuilder};
use harbor_operator::webhook::{WebhookState, admission_path, router};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::Resource;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const NAMESPACE: &str = "harbor";

fn cluster_spec(version: &str) -> Value {
    json!({
        "externalURL": "https://harbor.example",
        "version": version,
        "harborAdminPasswordRef": "admin-pw",
        "database": {
            "hosts": [{"host": "db", "port": 5432}],
            "username": "harbor",
            "passwordRef": "db-pw",
            "sslMode": "disable",
        },
        "redis": {"host": "redis", "port": 6379},
        "imageChartStorage": {"filesystem": {"registryPersistentVolume": {"claimName": "reg-pvc"}}},
    })
}

fn harbor_cluster() -> HarborCluster {
    let mut cluster = HarborCluster::new("demo", serde_json::from_value(cluster_spec("2.3.0")).unwrap());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

fn secret(name: &str, type_: &str, data: &[(&str, &str)]) -> Secret {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "type": type_,
        "stringData": data.iter().map(|(k, v)| ((*k).to_string(), json!(v))).collect::<serde_json::Map<_, _>>(),
    }))
    .unwrap()
}

fn insert_secret(client: &MockClusterClient, secret: &Secret) {
    client.insert(&ResourceType::namespaced::<Secret>(), secret);
}

fn reconciler<A, B>(client: &MockClusterClient, builder: B) -> Reconciler<A>
where
    A: Aggregate,
    B: ResourceBuilder<A> + 'static,
{
    let client: Arc<dyn ClusterClientTrait> = Arc::new(client.clone());
    Reconciler::new(
        client,
        Arc::new(ConfigStore::from_config(OperatorConfig::default())),
        Arc::new(builder),
    )
}

fn names<K: Resource<DynamicType = ()>>(client: &MockClusterClient) -> Vec<String> {
    client
        .objects(&ResourceType::namespaced::<K>())
        .into_iter()
        .filter_map(|o| o.metadata.name)
        .collect()
}

async fn reconcile_all<A: Aggregate>(client: &MockClusterClient, reconciler: &Reconciler<A>) {
    for name in names::<A>(client) {
        reconciler.reconcile(NAMESPACE, &name).await;
    }
}

/// Issues every certificate and writes its TLS secret.
fn issue_certificates(client: &MockClusterClient) {
    for certificate in client.objects(&ResourceType::namespaced::<Certificate>()) {
        let Some(name) = certificate.metadata.name.clone() else {
            continue;
        };
        let secret_name = certificate.data["spec"]["secretName"].as_str().unwrap().to_string();
        if !names::<Secret>(client).contains(&secret_name) {
            insert_secret(
                client,
                &secret(
                    &secret_name,
                    "kubernetes.io/tls",
                    &[("tls.crt", "CERT"), ("tls.key", "KEY"), ("ca.crt", "CA")],
                ),
            );
        }
        client.set_status(
            &ObjectKey::new(ResourceType::namespaced::<Certificate>(), Some(NAMESPACE), name),
            json!({"conditions": [{"type": "Ready", "status": "True"}]}),
        );
    }
}

/// Marks every Deployment as fully rolled out at its current generation.
fn roll_out(client: &MockClusterClient) {
    for deployment in client.objects(&ResourceType::namespaced::<Deployment>()) {
        let Some(name) = deployment.metadata.name.clone() else {
            continue;
        };
        let replicas = deployment.data["spec"]["replicas"].as_i64().unwrap_or(1);
        client.set_status(
            &ObjectKey::new(ResourceType::namespaced::<Deployment>(), Some(NAMESPACE), name),
            json!({
                "observedGeneration": deployment.metadata.generation.unwrap_or(1),
                "replicas": replicas,
                "availableReplicas": replicas,
            }),
        );
    }
}

fn stored_cluster(client: &MockClusterClient) -> HarborCluster {
    let object = client
        .objects(&ResourceType::namespaced::<HarborCluster>())
        .into_iter()
        .find(|o| o.metadata.name.as_deref() == Some("demo"))
        .unwrap();
    cluster_client::from_dynamic(object).unwrap()
}

fn cluster_ready(client: &MockClusterClient) -> bool {
    stored_cluster(client)
        .status
        .is_some_and(|status| status.is_condition_true(ConditionType::Ready))
}

/// The cluster controller plus the component controllers it needs.
struct Controllers {
    cluster: Reconciler<HarborCluster>,
    portal: Reconciler<Portal>,
    core: Reconciler<Core>,
    jobservice: Reconciler<JobService>,
    registry: Reconciler<Registry>,
    registryctl: Reconciler<RegistryController>,
}

impl Controllers {
    fn new(client: &MockClusterClient) -> Self {
        Self {
            cluster: reconciler(client, HarborClusterResources),
            portal: reconciler(client, PortalResources),
            core: reconciler(client, CoreResources),
            jobservice: reconciler(client, JobServiceResources),
            registry: reconciler(client, RegistryResources),
            registryctl: reconciler(client, RegistryControllerResources),
        }
    }

    /// One pass of every controller.
    async fn pass(&self, client: &MockClusterClient) {
        self.cluster.reconcile(NAMESPACE, "demo").await;
        reconcile_all(client, &self.portal).await;
        reconcile_all(client, &self.registry).await;
        reconcile_all(client, &self.registryctl).await;
        reconcile_all(client, &self.core).await;
        reconcile_all(client, &self.jobservice).await;
    }
}

/// A cluster with its secrets, driven until it reports ready.
async fn ready_cluster() -> (MockClusterClient, Controllers) {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<HarborCluster>(), &harbor_cluster());
    insert_secret(
        &client,
        &secret("admin-pw", "goharbor.io/single-secret", &[("secret", "Harbor12345")]),
    );
    insert_secret(
        &client,
        &secret("db-pw", "goharbor.io/postgresql", &[("postgresql-password", "pw")]),
    );

    let controllers = Controllers::new(&client);
    for _ in 0..8 {
        controllers.cluster.reconcile(NAMESPACE, "demo").await;
        if cluster_ready(&client) {
            break;
        }
        issue_certificates(&client);
        for _ in 0..2 {
            controllers.pass(&client).await;
            roll_out(&client);
        }
    }
    assert!(cluster_ready(&client), "cluster never became ready");
    (client, controllers)
}

fn find<K: Resource<DynamicType = ()>>(client: &MockClusterClient, name: &str) -> Option<kube::core::DynamicObject> {
    client
        .objects(&ResourceType::namespaced::<K>())
        .into_iter()
        .find(|o| o.metadata.name.as_deref() == Some(name))
}

/// Every stored object the controllers touch, keyed by kind and name.
fn snapshot(client: &MockClusterClient) -> Vec<Value> {
    [
        ResourceType::namespaced::<HarborCluster>(),
        ResourceType::namespaced::<Portal>(),
        ResourceType::namespaced::<Core>(),
        ResourceType::namespaced::<JobService>(),
        ResourceType::namespaced::<Registry>(),
        ResourceType::namespaced::<RegistryController>(),
        ResourceType::namespaced::<Certificate>(),
        ResourceType::namespaced::<Deployment>(),
        ResourceType::namespaced::<ConfigMap>(),
        ResourceType::namespaced::<Service>(),
        ResourceType::namespaced::<Secret>(),
    ]
    .iter()
    .flat_map(|resource| client.objects(resource))
    .map(|object| serde_json::to_value(object).unwrap())
    .collect()
}

#[tokio::test]
async fn test_minimal_cluster_becomes_ready() {
    let (client, controllers) = ready_cluster().await;

    assert_eq!(names::<Portal>(&client), vec!["demo-portal"]);
    assert_eq!(names::<Core>(&client), vec!["demo-core"]);
    assert_eq!(names::<JobService>(&client), vec!["demo-jobservice"]);
    assert_eq!(names::<Registry>(&client), vec!["demo-registry"]);
    assert_eq!(names::<RegistryController>(&client), vec!["demo-registryctl"]);

    let deployments = names::<Deployment>(&client);
    let config_maps = names::<ConfigMap>(&client);
    let services = names::<Service>(&client);
    for component in ["demo-portal", "demo-core", "demo-jobservice", "demo-registry", "demo-registryctl"] {
        assert!(deployments.iter().any(|n| n == component), "no deployment {component}");
        assert!(config_maps.iter().any(|n| n == component), "no config map {component}");
        assert!(services.iter().any(|n| n == component), "no service {component}");
    }

    // Workloads belong to their component, components to the cluster.
    let uid = stored_cluster(&client).metadata.uid.unwrap();
    let core_object = &client.objects(&ResourceType::namespaced::<Core>())[0];
    let owner = &core_object.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "HarborCluster");
    assert_eq!(owner.uid, uid);
    let deployment = find::<Deployment>(&client, "demo-core").unwrap();
    let owner = &deployment.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "Core");
    assert_eq!(owner.name, "demo-core");

    // Nothing changes once everything is ready.
    let writes = client.write_count();
    controllers.cluster.reconcile(NAMESPACE, "demo").await;
    reconcile_all(&client, &controllers.core).await;
    assert_eq!(client.write_count(), writes);
}

#[tokio::test]
async fn test_deleted_children_are_restored_in_one_pass() {
    let (client, controllers) = ready_cluster().await;
    let config = find::<ConfigMap>(&client, "demo-core").unwrap();
    let deployment = find::<Deployment>(&client, "demo-core").unwrap();

    for resource in [ResourceType::namespaced::<ConfigMap>(), ResourceType::namespaced::<Deployment>()] {
        let key = ObjectKey::new(resource, Some(NAMESPACE), "demo-core");
        assert!(client.remove(&key).is_some());
    }
    assert!(find::<ConfigMap>(&client, "demo-core").is_none());

    reconcile_all(&client, &controllers.core).await;

    let restored_config = find::<ConfigMap>(&client, "demo-core").expect("config map not restored");
    let restored_deployment = find::<Deployment>(&client, "demo-core").expect("deployment not restored");
    assert_eq!(restored_config.data["data"], config.data["data"]);
    assert_eq!(restored_deployment.data["spec"], deployment.data["spec"]);
    assert_eq!(restored_config.metadata.labels, config.metadata.labels);
    assert_eq!(
        restored_deployment.metadata.owner_references,
        deployment.metadata.owner_references
    );
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let (client, controllers) = ready_cluster().await;

    controllers.pass(&client).await;
    let once = snapshot(&client);
    let writes = client.write_count();

    controllers.pass(&client).await;
    assert_eq!(client.write_count(), writes, "second pass wrote");
    assert_eq!(snapshot(&client), once);
}

#[tokio::test]
async fn test_missing_admin_password_fails_the_cluster() {
    let client = MockClusterClient::new();
    client.insert(&ResourceType::namespaced::<HarborCluster>(), &harbor_cluster());
    insert_secret(
        &client,
        &secret("db-pw", "goharbor.io/postgresql", &[("postgresql-password", "pw")]),
    );

    reconciler(&client, HarborClusterResources).reconcile(NAMESPACE, "demo").await;

    let status = stored_cluster(&client).status.unwrap();
    let failed = status.condition(ConditionType::Failed).unwrap();
    assert!(failed.is_true());
    assert_eq!(failed.reason.as_deref(), Some("ReferenceMissing"));
    assert!(failed.message.as_deref().unwrap().contains("admin-pw"));
    assert!(names::<Deployment>(&client).is_empty());
    assert!(names::<Portal>(&client).is_empty());
}

fn webhook(client: &MockClusterClient) -> Arc<WebhookState> {
    Arc::new(WebhookState::new(
        Arc::new(client.clone()),
        Arc::new(Metrics::default().register().unwrap()),
    ))
}

fn admission_review(kind: &str, operation: &str, name: &str, spec: Value, old_spec: Option<Value>) -> Value {
    let object = |spec: Value| {
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": kind,
            "metadata": {"name": name, "namespace": NAMESPACE},
            "spec": spec,
        })
    };
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0d3b7c1e-5a52-4f49-9d51-4ab1b9f1c0a2",
            "kind": {"group": "goharbor.io", "version": "v1beta1", "kind": kind},
            "resource": {"group": "goharbor.io", "version": "v1beta1", "resource": format!("{}s", kind.to_lowercase())},
            "name": name,
            "namespace": NAMESPACE,
            "operation": operation,
            "userInfo": {"username": "admin"},
            "object": object(spec),
            "oldObject": old_spec.map(object),
            "dryRun": false,
        }
    })
}

/// Posts a review and returns `(allowed, denial message)`.
async fn admit(state: Arc<WebhookState>, path: &str, review: Value) -> (bool, String) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(review.to_string()))
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let reply: Value = serde_json::from_slice(&body).unwrap();
    let allowed = reply["response"]["allowed"].as_bool().unwrap();
    let message = reply["response"]["status"]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    (allowed, message)
}

fn server_configuration(default: bool, rules: &[&str]) -> Value {
    json!({
        "serverURL": "https://harbor.example",
        "accessCredential": {"namespace": NAMESPACE, "accessSecretRef": "robot"},
        "version": "2.5.0",
        "default": default,
        "rules": rules,
    })
}

#[tokio::test]
async fn test_only_one_default_server_configuration() {
    let client = MockClusterClient::new();
    let state = webhook(&client);
    let path = admission_path::<HarborServerConfiguration>();

    let first = admission_review("HarborServerConfiguration", "CREATE", "first", server_configuration(true, &[]), None);
    let (allowed, _) = admit(state.clone(), &path, first).await;
    assert!(allowed);
    client.insert(
        &ResourceType::cluster::<HarborServerConfiguration>(),
        &HarborServerConfiguration::new("first", serde_json::from_value(server_configuration(true, &[])).unwrap()),
    );

    let second = admission_review("HarborServerConfiguration", "CREATE", "second", server_configuration(true, &[]), None);
    let (allowed, message) = admit(state.clone(), &path, second).await;
    assert!(!allowed);
    assert!(message.contains("\"first\""), "unexpected message: {message}");

    // A non-default configuration is fine.
    let third = admission_review("HarborServerConfiguration", "CREATE", "third", server_configuration(false, &[]), None);
    let (allowed, _) = admit(state, &path, third).await;
    assert!(allowed);
}

#[tokio::test]
async fn test_invalid_rule_pattern_is_denied() {
    let client = MockClusterClient::new();
    let review = admission_review(
        "HarborServerConfiguration",
        "CREATE",
        "mirror",
        server_configuration(false, &["[(,replace"]),
        None,
    );
    let (allowed, message) = admit(webhook(&client), &admission_path::<HarborServerConfiguration>(), review).await;
    assert!(!allowed);
    assert!(message.contains("[("), "unexpected message: {message}");
}

#[tokio::test]
async fn test_two_storage_backends_are_denied() {
    let client = MockClusterClient::new();
    let mut spec = cluster_spec("2.4.0");
    spec["imageChartStorage"]["s3"] = json!({"bucket": "images", "region": "eu-west-1"});
    let review = admission_review("HarborCluster", "CREATE", "demo", spec, None);
    let (allowed, message) = admit(webhook(&client), &admission_path::<HarborCluster>(), review).await;
    assert!(!allowed);
    assert!(message.contains("Err2StorageConfiguration"), "unexpected message: {message}");
    assert!(message.contains("spec.imageChartStorage"), "unexpected message: {message}");
}

#[tokio::test]
async fn test_version_downgrade_is_denied() {
    let client = MockClusterClient::new();
    let review = admission_review(
        "HarborCluster",
        "UPDATE",
        "demo",
        cluster_spec("2.2.0"),
        Some(cluster_spec("2.4.0")),
    );
    let (allowed, message) = admit(webhook(&client), &admission_path::<HarborCluster>(), review).await;
    assert!(!allowed);
    assert!(message.contains("downgrade not allowed"), "unexpected message: {message}");

    // Patch upgrades within the same minor are fine.
    let review = admission_review(
        "HarborCluster",
        "UPDATE",
        "demo",
        cluster_spec("2.4.1"),
        Some(cluster_spec("2.4.0")),
    );
    let (allowed, message) = admit(webhook(&client), &admission_path::<HarborCluster>(), review).await;
    assert!(allowed, "unexpected denial: {message}");
}
