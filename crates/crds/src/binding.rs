//! Bindings between namespaces and an external Harbor
//!
//! `HarborServerConfiguration` is cluster scoped and points at a Harbor
//! endpoint with credentials, a namespace selector and image rewrite rules.
//! `PullSecretBinding` ties one service account to a project on such a server.

use crate::field::{FieldError, FieldPath};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "HarborServerConfiguration",
    shortname = "hsc",
    status = "BindingStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Harbor Server","type":"string","jsonPath":".spec.serverURL"}"#,
    printcolumn = r#"{"name":"Default","type":"boolean","jsonPath":".spec.default"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HarborServerConfigurationSpec {
    #[serde(rename = "serverURL")]
    pub server_url: String,

    pub access_credential: AccessCredential,

    /// Harbor version of the remote server
    pub version: String,

    #[serde(default)]
    pub insecure: bool,

    /// Applies to every namespace that has no explicit binding
    #[serde(default)]
    pub default: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,

    /// `<regex prefix>,<replacement>` pairs rewriting image references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    pub namespace: String,
    pub access_secret_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "PullSecretBinding",
    namespaced,
    shortname = "psb",
    status = "BindingStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Harbor Server","type":"string","jsonPath":".spec.harborServerConfig"}"#,
    printcolumn = r#"{"name":"Service Account","type":"string","jsonPath":".spec.serviceAccount"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PullSecretBindingSpec {
    /// Name of the `HarborServerConfiguration`
    pub harbor_server_config: String,

    pub service_account: String,

    pub project_name: String,
}

/// A parsed rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub prefix: String,
    pub replacement: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule {0:?} must have the form <prefix>,<replacement>")]
    Format(String),
    #[error("rule {rule:?}: {prefix:?} is not a valid regular expression: {reason}")]
    Regex {
        rule: String,
        prefix: String,
        reason: String,
    },
}

/// Splits `rule` on its comma and trims both halves.
pub fn parse_rule(rule: &str) -> Result<Rule, RuleError> {
    let parts: Vec<&str> = rule.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [prefix, replacement] if !prefix.is_empty() && !replacement.is_empty() => Ok(Rule {
            prefix: prefix.to_string(),
            replacement: replacement.to_string(),
        }),
        _ => Err(RuleError::Format(rule.to_string())),
    }
}

impl HarborServerConfigurationSpec {
    /// Parses every rule, compiling prefixes with `compile`.
    ///
    /// `compile` is a seam so callers can share a compiled-pattern cache.
    pub fn rule_errors<F>(&self, mut compile: F) -> Vec<FieldError>
    where
        F: FnMut(&str) -> Result<(), String>,
    {
        let rules = FieldPath::spec().child("rules");
        let mut errors = Vec::new();
        for (i, raw) in self.rules.iter().enumerate() {
            let result = parse_rule(raw).and_then(|rule| {
                compile(&rule.prefix).map_err(|reason| RuleError::Regex {
                    rule: raw.clone(),
                    prefix: rule.prefix.clone(),
                    reason,
                })
            });
            if let Err(e) = result {
                errors.push(FieldError::invalid(rules.index(i), e.to_string()));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rules: &[&str]) -> HarborServerConfigurationSpec {
        HarborServerConfigurationSpec {
            server_url: "https://harbor.example".to_string(),
            access_credential: AccessCredential {
                namespace: "harbor".to_string(),
                access_secret_ref: "robot".to_string(),
            },
            version: "2.5.0".to_string(),
            insecure: false,
            default: false,
            namespace_selector: None,
            rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn compile(pattern: &str) -> Result<(), String> {
        regex::Regex::new(pattern)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_parse_rule_trims() {
        let rule = parse_rule(" docker.io , harbor.example/proxy ").unwrap();
        assert_eq!(rule.prefix, "docker.io");
        assert_eq!(rule.replacement, "harbor.example/proxy");
    }

    #[test]
    fn test_parse_rule_rejects_missing_replacement() {
        assert!(parse_rule("docker.io").is_err());
        assert!(parse_rule("a,b,c").is_err());
        assert!(parse_rule("a,").is_err());
    }

    #[test]
    fn test_invalid_regex_rule() {
        let errors = spec(&["[(,replace"]).rule_errors(compile);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_str(), "spec.rules[0]");
        assert!(errors[0].to_string().contains("not a valid regular expression"));
    }

    #[test]
    fn test_valid_rules() {
        let errors = spec(&["^docker.io,harbor.example/dockerhub", "quay.io/.*,harbor.example/quay"])
            .rule_errors(compile);
        assert!(errors.is_empty());
    }
}
