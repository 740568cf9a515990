//! Distributed tracing settings passed through to Harbor components
//!
//! The operator does not trace itself through these settings; it renders
//! them into each component's `TRACE_*` environment.

use crate::component::ComponentName;
use crate::duration::GoDuration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub provider: Option<TraceProvider>,

    /// Fraction of requests sampled
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for TraceSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            sample_rate: default_sample_rate(),
            namespace: None,
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum TraceProvider {
    #[serde(rename = "jaeger")]
    Jaeger(JaegerSpec),

    #[serde(rename = "otel")]
    Otel(OtelSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum JaegerSpec {
    #[serde(rename = "collector")]
    Collector(JaegerCollector),

    #[serde(rename = "agent")]
    Agent(JaegerAgent),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JaegerCollector {
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Secret of type `goharbor.io/single-secret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JaegerAgent {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OtelSpec {
    pub endpoint: String,

    #[serde(default = "default_otel_path")]
    pub url_path: String,

    #[serde(default)]
    pub compression: bool,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_otel_timeout")]
    pub timeout: GoDuration,
}

fn default_otel_path() -> String {
    "/v1/traces".to_string()
}

fn default_otel_timeout() -> GoDuration {
    GoDuration::new("10s")
}

impl TraceSpec {
    /// `TRACE_*` variables for `component`.
    pub fn env(&self, component: ComponentName) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("TRACE_ENABLED".to_string(), self.enabled.to_string());
        if !self.enabled {
            return env;
        }
        env.insert("TRACE_SERVICE_NAME".to_string(), format!("harbor-{component}"));
        env.insert("TRACE_SAMPLE_RATE".to_string(), self.sample_rate.to_string());
        if let Some(namespace) = &self.namespace {
            env.insert("TRACE_NAMESPACE".to_string(), namespace.clone());
        }
        if !self.attributes.is_empty() {
            let attributes = serde_json::to_string(&self.attributes).unwrap_or_default();
            env.insert("TRACE_ATTRIBUTES".to_string(), attributes);
        }
        match &self.provider {
            Some(TraceProvider::Jaeger(JaegerSpec::Collector(collector))) => {
                env.insert("TRACE_JAEGER_ENDPOINT".to_string(), collector.endpoint.clone());
                if let Some(username) = &collector.username {
                    env.insert("TRACE_JAEGER_USERNAME".to_string(), username.clone());
                }
            }
            Some(TraceProvider::Jaeger(JaegerSpec::Agent(agent))) => {
                env.insert("TRACE_JAEGER_AGENT_HOSTNAME".to_string(), agent.host.clone());
                if let Some(port) = agent.port {
                    env.insert("TRACE_JAEGER_AGENT_PORT".to_string(), port.to_string());
                }
            }
            Some(TraceProvider::Otel(otel)) => {
                env.insert("TRACE_OTEL_ENDPOINT".to_string(), otel.endpoint.clone());
                env.insert("TRACE_OTEL_URL_PATH".to_string(), otel.url_path.clone());
                env.insert("TRACE_OTEL_COMPRESSION".to_string(), otel.compression.to_string());
                env.insert("TRACE_OTEL_INSECURE".to_string(), otel.insecure.to_string());
                env.insert("TRACE_OTEL_TIMEOUT".to_string(), otel.timeout.to_string());
            }
            None => {}
        }
        env
    }

    /// Secret holding the Jaeger collector password, if any.
    pub fn password_ref(&self) -> Option<&str> {
        match &self.provider {
            Some(TraceProvider::Jaeger(JaegerSpec::Collector(c))) => c.password_ref.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_trace_only_sets_the_switch() {
        let env = TraceSpec::default().env(ComponentName::Core);
        assert_eq!(env.len(), 1);
        assert_eq!(env["TRACE_ENABLED"], "false");
    }

    #[test]
    fn test_otel_env() {
        let spec: TraceSpec = serde_json::from_str(
            r#"{"enabled":true,"sampleRate":0.5,"otel":{"endpoint":"otel:4318"}}"#,
        )
        .unwrap();
        let env = spec.env(ComponentName::JobService);
        assert_eq!(env["TRACE_SERVICE_NAME"], "harbor-jobservice");
        assert_eq!(env["TRACE_SAMPLE_RATE"], "0.5");
        assert_eq!(env["TRACE_OTEL_ENDPOINT"], "otel:4318");
        assert_eq!(env["TRACE_OTEL_URL_PATH"], "/v1/traces");
        assert_eq!(env["TRACE_OTEL_TIMEOUT"], "10s");
    }

    #[test]
    fn test_jaeger_collector() {
        let spec: TraceSpec = serde_json::from_str(
            r#"{"enabled":true,"jaeger":{"collector":{"endpoint":"http://j:14268","passwordRef":"jp"}}}"#,
        )
        .unwrap();
        assert_eq!(spec.password_ref(), Some("jp"));
        assert_eq!(spec.env(ComponentName::Core)["TRACE_JAEGER_ENDPOINT"], "http://j:14268");
    }
}
