//! Status shared by every Harbor resource
//!
//! Each resource reports the generation it last reconciled, the identity of
//! the operator that did so, and three conditions (`Ready`, `InProgress`,
//! `Failed`) aggregated from the children it owns.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type
///
/// Serializes as PascalCase ("Ready", "InProgress", "Failed") but also
/// deserializes lowercase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    #[serde(alias = "ready")]
    Ready,

    #[serde(alias = "inprogress")]
    InProgress,

    #[serde(alias = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    #[serde(alias = "true")]
    True,

    #[serde(alias = "false")]
    False,

    #[default]
    #[serde(alias = "unknown")]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: ConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Name, version and commit of the operator that wrote a status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorIdentity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub controller_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub controller_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub controller_git_commit: String,
}

/// State of one child object as last observed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChildStatus {
    pub kind: String,
    pub name: String,
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status block of every Harbor resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Available replicas of the component's workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub operator: OperatorIdentity,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildStatus>,
}

impl ComponentStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_condition_true(&self, type_: ConditionType) -> bool {
        self.condition(type_).is_some_and(Condition::is_true)
    }

    /// Ready and describing `generation`.
    pub fn is_ready_at(&self, generation: Option<i64>) -> bool {
        self.observed_generation == generation && self.is_condition_true(ConditionType::Ready)
    }

    /// Failed and describing `generation`.
    pub fn is_failed_at(&self, generation: Option<i64>) -> bool {
        self.observed_generation == generation && self.is_condition_true(ConditionType::Failed)
    }
}

/// Inserts or replaces a condition of the same type.
///
/// The transition time is carried over when the status value did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}
