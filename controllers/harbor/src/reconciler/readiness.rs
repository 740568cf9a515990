//! Readiness of applied children.

use crate::graph::Readiness;
use crds::certificate::CertificateStatus;
use crds::{ComponentStatus, ConditionType};
use kube::core::DynamicObject;
use serde_json::Value;

/// What the last observed state of a child says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Ready,
    /// Not there yet; the message says what is missing
    Pending(String),
    /// The child reports a failure of its own
    Failed(String),
}

impl Observation {
    pub fn is_ready(&self) -> bool {
        matches!(self, Observation::Ready)
    }
}

fn status(object: &DynamicObject) -> Option<&Value> {
    object.data.get("status").filter(|s| !s.is_null())
}

/// Interprets a stored child according to its readiness rule.
pub fn observe(readiness: Readiness, object: &DynamicObject) -> Observation {
    match readiness {
        Readiness::Exists => Observation::Ready,
        Readiness::Deployment => deployment(object),
        Readiness::Certificate => certificate(object),
        Readiness::Component => component(object),
    }
}

fn deployment(object: &DynamicObject) -> Observation {
    let generation = object.metadata.generation.unwrap_or(0);
    let wanted = object
        .data
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let Some(status) = status(object) else {
        return Observation::Pending("rollout not observed yet".to_string());
    };
    let observed = status.get("observedGeneration").and_then(Value::as_i64).unwrap_or(0);
    if observed < generation {
        return Observation::Pending(format!("generation {generation} not observed yet"));
    }
    let available = status.get("availableReplicas").and_then(Value::as_i64).unwrap_or(0);
    if available < wanted {
        return Observation::Pending(format!("{available}/{wanted} replicas available"));
    }
    Observation::Ready
}

fn certificate(object: &DynamicObject) -> Observation {
    let parsed = status(object)
        .cloned()
        .map(serde_json::from_value::<CertificateStatus>)
        .transpose();
    match parsed {
        Ok(Some(status)) if status.is_ready() => Observation::Ready,
        Ok(Some(status)) => {
            let detail = status
                .conditions
                .iter()
                .find(|c| c.type_ == "Ready")
                .and_then(|c| c.message.clone())
                .unwrap_or_else(|| "certificate not issued yet".to_string());
            Observation::Pending(detail)
        }
        Ok(None) => Observation::Pending("certificate not issued yet".to_string()),
        Err(e) => Observation::Pending(format!("unreadable certificate status: {e}")),
    }
}

fn component(object: &DynamicObject) -> Observation {
    let parsed = status(object)
        .cloned()
        .map(serde_json::from_value::<ComponentStatus>)
        .transpose();
    let status = match parsed {
        Ok(Some(status)) => status,
        Ok(None) => return Observation::Pending("not reconciled yet".to_string()),
        Err(e) => return Observation::Pending(format!("unreadable status: {e}")),
    };
    let generation = object.metadata.generation;
    if status.is_failed_at(generation) {
        let message = status
            .condition(ConditionType::Failed)
            .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
            .unwrap_or_else(|| "failed".to_string());
        return Observation::Failed(message);
    }
    if status.is_ready_at(generation) {
        return Observation::Ready;
    }
    let detail = status
        .condition(ConditionType::InProgress)
        .filter(|c| c.is_true())
        .and_then(|c| c.message.clone())
        .unwrap_or_else(|| "not ready yet".to_string());
    Observation::Pending(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn object(generation: i64, data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                generation: Some(generation),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn test_deployment_rollout() {
        let fresh = object(2, json!({"spec": {"replicas": 2}}));
        assert!(!observe(Readiness::Deployment, &fresh).is_ready());

        let stale = object(2, json!({"spec": {"replicas": 2}, "status": {"observedGeneration": 1, "availableReplicas": 2}}));
        assert!(!observe(Readiness::Deployment, &stale).is_ready());

        let partial = object(2, json!({"spec": {"replicas": 2}, "status": {"observedGeneration": 2, "availableReplicas": 1}}));
        assert_eq!(
            observe(Readiness::Deployment, &partial),
            Observation::Pending("1/2 replicas available".to_string())
        );

        let done = object(2, json!({"spec": {"replicas": 2}, "status": {"observedGeneration": 2, "availableReplicas": 2}}));
        assert!(observe(Readiness::Deployment, &done).is_ready());
    }

    #[test]
    fn test_certificate_ready_condition() {
        let issued = object(1, json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}}));
        assert!(observe(Readiness::Certificate, &issued).is_ready());
        let pending = object(1, json!({"status": {"conditions": [{"type": "Ready", "status": "False", "message": "issuing"}]}}));
        assert_eq!(observe(Readiness::Certificate, &pending), Observation::Pending("issuing".to_string()));
    }

    #[test]
    fn test_component_status_must_match_generation() {
        let ready_old = object(3, json!({"status": {"observedGeneration": 2, "conditions": [{"type": "Ready", "status": "True"}]}}));
        assert!(!observe(Readiness::Component, &ready_old).is_ready());

        let ready = object(3, json!({"status": {"observedGeneration": 3, "conditions": [{"type": "Ready", "status": "True"}]}}));
        assert!(observe(Readiness::Component, &ready).is_ready());

        let failed = object(3, json!({"status": {"observedGeneration": 3, "conditions": [
            {"type": "Failed", "status": "True", "reason": "ReferenceMissing", "message": "secret \"x\" missing"}
        ]}}));
        assert_eq!(
            observe(Readiness::Component, &failed),
            Observation::Failed("secret \"x\" missing".to_string())
        );
    }

    #[test]
    fn test_plain_objects_are_ready_once_present() {
        assert!(observe(Readiness::Exists, &object(1, json!({}))).is_ready());
    }
}
