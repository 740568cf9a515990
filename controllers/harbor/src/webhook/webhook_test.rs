use super::*;
use axum::body::Body;
use axum::http::Request;
use cluster_client::{MockClusterClient, ResourceType};
use crds::HarborServerConfigurationSpec;
use serde_json::{Value, json};
use tower::ServiceExt;

fn state(client: &MockClusterClient) -> Arc<WebhookState> {
    Arc::new(WebhookState::new(
        Arc::new(client.clone()),
        Arc::new(Metrics::default().register().unwrap()),
    ))
}

fn server_spec(default: bool, rules: &[&str]) -> Value {
    json!({
        "serverURL": "https://harbor.example.com",
        "accessCredential": {"namespace": "harbor", "accessSecretRef": "robot"},
        "version": "2.5.0",
        "default": default,
        "rules": rules,
    })
}

fn review(kind: &str, operation: &str, name: &str, object: Value, old: Option<Value>) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "7f0b2891-916f-4ed6-b7cd-27bff1815a8c",
            "kind": {"group": "goharbor.io", "version": "v1beta1", "kind": kind},
            "resource": {"group": "goharbor.io", "version": "v1beta1", "resource": format!("{}s", kind.to_lowercase())},
            "name": name,
            "operation": operation,
            "userInfo": {"username": "admin"},
            "object": object,
            "oldObject": old,
            "dryRun": false,
        }
    })
}

fn object(kind: &str, name: &str, spec: Value) -> Value {
    json!({
        "apiVersion": "goharbor.io/v1beta1",
        "kind": kind,
        "metadata": {"name": name},
        "spec": spec,
    })
}

async fn post_json(state: Arc<WebhookState>, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[test]
fn test_admission_paths() {
    assert_eq!(
        admission_path::<HarborCluster>(),
        "/validate-goharbor-io-v1beta1-harborcluster"
    );
    assert_eq!(
        admission_path::<RegistryController>(),
        "/validate-goharbor-io-v1beta1-registrycontroller"
    );
}

#[tokio::test]
async fn test_second_default_server_configuration_is_denied() {
    let client = MockClusterClient::new();
    let incumbent = HarborServerConfiguration::new(
        "primary",
        serde_json::from_value::<HarborServerConfigurationSpec>(server_spec(true, &[])).unwrap(),
    );
    client.insert(&ResourceType::cluster::<HarborServerConfiguration>(), &incumbent);
    let state = state(&client);
    let path = admission_path::<HarborServerConfiguration>();

    let body = review(
        "HarborServerConfiguration",
        "CREATE",
        "secondary",
        object("HarborServerConfiguration", "secondary", server_spec(true, &[])),
        None,
    );
    let (status, reply) = post_json(state.clone(), &path, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"]["allowed"], json!(false));
    assert!(reply.to_string().contains("\\\"primary\\\" is already the default"));

    // The incumbent itself may be updated.
    let body = review(
        "HarborServerConfiguration",
        "UPDATE",
        "primary",
        object("HarborServerConfiguration", "primary", server_spec(true, &["docker.io,harbor.example.com/proxy"])),
        Some(object("HarborServerConfiguration", "primary", server_spec(true, &[]))),
    );
    let (_, reply) = post_json(state, &path, body).await;
    assert_eq!(reply["response"]["allowed"], json!(true));
}

#[tokio::test]
async fn test_rules_must_compile() {
    let client = MockClusterClient::new();
    let state = state(&client);
    let body = review(
        "HarborServerConfiguration",
        "CREATE",
        "mirror",
        object("HarborServerConfiguration", "mirror", server_spec(false, &["quay.io/(, harbor.example.com/quay"])),
        None,
    );
    let (_, reply) = post_json(state.clone(), &admission_path::<HarborServerConfiguration>(), body).await;
    assert_eq!(reply["response"]["allowed"], json!(false));
    assert!(reply.to_string().contains("is not a valid regular expression"));
    assert_eq!(state.regexes.len(), 1);
}

#[tokio::test]
async fn test_cluster_with_two_storage_backends_is_denied() {
    let client = MockClusterClient::new();
    let spec = json!({
        "externalURL": "https://harbor.example.com",
        "version": "2.4.0",
        "harborAdminPasswordRef": "admin",
        "imageChartStorage": {
            "filesystem": {"registryPersistentVolume": {"claimName": "registry"}},
            "s3": {"bucket": "images", "region": "eu-west-1"},
        },
    });
    let body = review("HarborCluster", "CREATE", "demo", object("HarborCluster", "demo", spec), None);
    let (_, reply) = post_json(state(&client), &admission_path::<HarborCluster>(), body).await;
    assert_eq!(reply["response"]["allowed"], json!(false));
    assert!(reply.to_string().contains("Err2StorageConfiguration"));
}

#[tokio::test]
async fn test_binding_target_is_immutable() {
    let client = MockClusterClient::new();
    let spec = |project: &str| json!({"harborServerConfig": "primary", "serviceAccount": "default", "projectName": project});
    let body = review(
        "PullSecretBinding",
        "UPDATE",
        "pull",
        object("PullSecretBinding", "pull", spec("team-b")),
        Some(object("PullSecretBinding", "pull", spec("team-a"))),
    );
    let (_, reply) = post_json(state(&client), &admission_path::<PullSecretBinding>(), body).await;
    assert_eq!(reply["response"]["allowed"], json!(false));
    assert!(reply.to_string().contains("spec.projectName"));
}

#[tokio::test]
async fn test_deletes_are_allowed() {
    let client = MockClusterClient::new();
    let state = state(&client);
    let mut body = review("Registry", "DELETE", "demo-registry", Value::Null, None);
    body["request"]["oldObject"] = object("Registry", "demo-registry", json!({}));
    let (_, reply) = post_json(state.clone(), &admission_path::<Registry>(), body).await;
    assert_eq!(reply["response"]["allowed"], json!(true));

    let metrics = String::from_utf8(state.metrics.encode().unwrap()).unwrap();
    assert!(metrics.contains("allowed=\"true\""));
}

#[tokio::test]
async fn test_conversion_review_echoes_uid() {
    let client = MockClusterClient::new();
    let body = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "request": {"uid": "c-1", "desiredAPIVersion": "goharbor.io/v1beta1", "objects": []},
    });
    let (status, reply) = post_json(state(&client), CONVERT_PATH, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"]["uid"], json!("c-1"));
    assert_eq!(reply["response"]["result"]["status"], json!("Success"));
    assert!(reply.get("request").is_none());
}

#[tokio::test]
async fn test_conversion_review_without_request_is_rejected() {
    let client = MockClusterClient::new();
    let body = json!({"apiVersion": "apiextensions.k8s.io/v1", "kind": "ConversionReview"});
    let (status, reply) = post_json(state(&client), CONVERT_PATH, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply["error"].as_str().unwrap().contains("no request"));
}
