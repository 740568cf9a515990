//! Turns node outcomes and pass errors into conditions.

use super::apply::{NodeOutcome, NodeState};
use super::readiness::Observation;
use crate::error::{ControllerError, ErrorKind};
use crate::graph::Readiness;
use chrono::{DateTime, Utc};
use crds::{ChildStatus, ComponentStatus, Condition, ConditionStatus, ConditionType, OperatorIdentity, set_condition};
use serde_json::Value;

/// Name recorded in every status this operator writes.
pub const OPERATOR_NAME: &str = "harbor-operator";

/// Overall result of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    /// Children still converging
    Pending,
    Failed(ErrorKind),
}

/// Conditions and child summary computed by one pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub conditions: [Condition; 3],
    /// `None` when the pass failed before any child was applied
    pub children: Option<Vec<ChildStatus>>,
    pub replicas: Option<i32>,
}

fn conditions(ready: Condition, in_progress: Condition, failed: Condition) -> [Condition; 3] {
    [ready, in_progress, failed]
}

fn pending(reason: &str, message: &str) -> [Condition; 3] {
    conditions(
        Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason(reason, message),
        Condition::new(ConditionType::InProgress, ConditionStatus::True).with_reason(reason, message),
        Condition::new(ConditionType::Failed, ConditionStatus::False),
    )
}

fn failed(reason: &str, message: &str) -> [Condition; 3] {
    conditions(
        Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason(reason, message),
        Condition::new(ConditionType::InProgress, ConditionStatus::False),
        Condition::new(ConditionType::Failed, ConditionStatus::True).with_reason(reason, message),
    )
}

impl Evaluation {
    /// Status for a pass that stopped on `error`.
    pub fn from_error(error: &ControllerError) -> Self {
        Self::for_error(error, &error.to_string(), None, None)
    }

    fn for_error(
        error: &ControllerError,
        message: &str,
        children: Option<Vec<ChildStatus>>,
        replicas: Option<i32>,
    ) -> Self {
        let kind = error.kind();
        let conditions = match kind {
            ErrorKind::Transient => pending(error.reason(), message),
            _ => failed(error.reason(), message),
        };
        Self {
            verdict: Verdict::Failed(kind),
            conditions,
            children,
            replicas,
        }
    }
}

fn child_name(outcome: &NodeOutcome) -> String {
    format!("{} {}", outcome.key.resource.kind(), outcome.key.name)
}

fn child_status(outcome: &NodeOutcome) -> ChildStatus {
    let message = match &outcome.state {
        NodeState::Applied(Observation::Ready) => None,
        NodeState::Applied(Observation::Pending(m) | Observation::Failed(m)) | NodeState::Waiting(m) => {
            Some(m.clone())
        }
        NodeState::Error(e) => Some(e.to_string()),
    };
    ChildStatus {
        kind: outcome.key.resource.kind().to_string(),
        name: outcome.key.name.clone(),
        ready: outcome.is_ready(),
        message,
    }
}

fn available_replicas(outcomes: &[NodeOutcome]) -> Option<i32> {
    outcomes
        .iter()
        .filter(|o| o.readiness == Readiness::Deployment)
        .find_map(|o| o.object.as_ref())
        .map(|object| {
            object
                .data
                .pointer("/status/availableReplicas")
                .and_then(Value::as_i64)
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(0)
        })
}

/// Aggregates node outcomes.
///
/// An apply error wins over a failed child, which wins over a child that is
/// still converging.
pub fn evaluate(outcomes: &[NodeOutcome]) -> Evaluation {
    let children: Vec<ChildStatus> = outcomes.iter().map(child_status).collect();
    let replicas = available_replicas(outcomes);

    if let Some((outcome, error)) = outcomes.iter().find_map(|o| match &o.state {
        NodeState::Error(e) => Some((o, e)),
        _ => None,
    }) {
        let message = format!("{}: {}", child_name(outcome), error);
        return Evaluation::for_error(error, &message, Some(children), replicas);
    }

    if let Some((outcome, detail)) = outcomes.iter().find_map(|o| match &o.state {
        NodeState::Applied(Observation::Failed(m)) => Some((o, m)),
        _ => None,
    }) {
        let reason = if outcome.readiness == Readiness::Component {
            "ComponentFailed"
        } else {
            "ChildFailed"
        };
        return Evaluation {
            verdict: Verdict::Failed(ErrorKind::Referential),
            conditions: failed(reason, &format!("{}: {}", child_name(outcome), detail)),
            children: Some(children),
            replicas,
        };
    }

    if let Some(outcome) = outcomes.iter().find(|o| !o.is_ready()) {
        let detail = match &outcome.state {
            NodeState::Applied(Observation::Pending(m)) | NodeState::Waiting(m) => m.as_str(),
            _ => "not ready",
        };
        return Evaluation {
            verdict: Verdict::Pending,
            conditions: pending("Progressing", &format!("{}: {}", child_name(outcome), detail)),
            children: Some(children),
            replicas,
        };
    }

    let message = format!("{} children ready", outcomes.len());
    Evaluation {
        verdict: Verdict::Ready,
        conditions: conditions(
            Condition::new(ConditionType::Ready, ConditionStatus::True).with_reason("Reconciled", message),
            Condition::new(ConditionType::InProgress, ConditionStatus::False),
            Condition::new(ConditionType::Failed, ConditionStatus::False),
        ),
        children: Some(children),
        replicas,
    }
}

pub fn operator_identity() -> OperatorIdentity {
    OperatorIdentity {
        controller_name: OPERATOR_NAME.to_string(),
        controller_version: env!("CARGO_PKG_VERSION").to_string(),
        controller_git_commit: option_env!("GIT_COMMIT").unwrap_or_default().to_string(),
    }
}

/// Status to store after a pass, starting from the previous one.
pub fn next_status(
    previous: Option<&ComponentStatus>,
    generation: Option<i64>,
    evaluation: &Evaluation,
    now: DateTime<Utc>,
) -> ComponentStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.observed_generation = generation;
    status.operator = operator_identity();
    if let Some(children) = &evaluation.children {
        status.children.clone_from(children);
        status.replicas = evaluation.replicas;
    }
    for condition in &evaluation.conditions {
        set_condition(&mut status.conditions, condition.clone(), now);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::{ObjectKey, ResourceType};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn outcome(name: &str, readiness: Readiness, state: NodeState) -> NodeOutcome {
        let resource = match readiness {
            Readiness::Deployment => ResourceType::namespaced::<Deployment>(),
            _ => ResourceType::namespaced::<ConfigMap>(),
        };
        NodeOutcome {
            key: ObjectKey::new(resource, Some("harbor"), name),
            readiness,
            state,
            object: None,
        }
    }

    #[test]
    fn test_all_ready() {
        let outcomes = vec![
            outcome("a", Readiness::Exists, NodeState::Applied(Observation::Ready)),
            outcome("b", Readiness::Deployment, NodeState::Applied(Observation::Ready)),
        ];
        let evaluation = evaluate(&outcomes);
        assert_eq!(evaluation.verdict, Verdict::Ready);
        assert!(evaluation.conditions[0].is_true());
        assert!(!evaluation.conditions[1].is_true());
        assert!(!evaluation.conditions[2].is_true());
        assert_eq!(evaluation.children.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_waiting_child_is_in_progress() {
        let outcomes = vec![
            outcome("a", Readiness::Exists, NodeState::Applied(Observation::Ready)),
            outcome(
                "b",
                Readiness::Deployment,
                NodeState::Applied(Observation::Pending("0/1 replicas available".to_string())),
            ),
        ];
        let evaluation = evaluate(&outcomes);
        assert_eq!(evaluation.verdict, Verdict::Pending);
        assert!(evaluation.conditions[1].is_true());
        assert_eq!(
            evaluation.conditions[1].message.as_deref(),
            Some("Deployment b: 0/1 replicas available")
        );
    }

    #[test]
    fn test_apply_error_names_the_child() {
        let outcomes = vec![
            outcome("a", Readiness::Exists, NodeState::Applied(Observation::Ready)),
            outcome(
                "b",
                Readiness::Exists,
                NodeState::Error(ControllerError::Render("bad port".to_string())),
            ),
        ];
        let evaluation = evaluate(&outcomes);
        assert_eq!(evaluation.verdict, Verdict::Failed(ErrorKind::Permanent));
        assert!(evaluation.conditions[2].is_true());
        assert_eq!(
            evaluation.conditions[2].message.as_deref(),
            Some("ConfigMap b: Render failed: bad port")
        );
        let children = evaluation.children.unwrap();
        assert!(children[0].ready);
        assert!(!children[1].ready);
    }

    #[test]
    fn test_next_status_is_stable() {
        let outcomes = vec![outcome("a", Readiness::Exists, NodeState::Applied(Observation::Ready))];
        let evaluation = evaluate(&outcomes);
        let now = Utc::now();
        let first = next_status(None, Some(1), &evaluation, now);
        let second = next_status(Some(&first), Some(1), &evaluation, now + chrono::Duration::seconds(5));
        assert_eq!(first, second);
        assert_eq!(first.operator.controller_name, OPERATOR_NAME);
    }
}
