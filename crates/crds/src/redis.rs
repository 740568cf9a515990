//! Redis connection settings
//!
//! One Redis endpoint is shared by the whole cluster; components are separated
//! by database index (see `ComponentName::redis_database_index`).

use crate::component::ComponentName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REDIS_PORT: i32 = 6379;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisServer {
    /// Redis host, or sentinel host when `sentinelMasterSet` is set
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel_master_set: Option<String>,
}

impl RedisServer {
    pub fn port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_REDIS_PORT)
    }
}

/// Cluster-level Redis endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    #[serde(flatten)]
    pub server: RedisServer,

    /// Secret of type `goharbor.io/redis`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    /// TLS secret used to reach Redis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
}

impl RedisSpec {
    /// Connection a component uses, `None` for components without Redis.
    pub fn connection_for(&self, component: ComponentName) -> Option<RedisConnection> {
        let database = component.redis_database_index()?;
        Some(RedisConnection {
            server: self.server.clone(),
            password_ref: self.password_ref.clone(),
            certificate_ref: self.certificate_ref.clone(),
            database,
        })
    }
}

/// Connection to one Redis database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisConnection {
    #[serde(flatten)]
    pub server: RedisServer,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,

    #[serde(default)]
    pub database: i32,
}

impl RedisConnection {
    /// Connection URL in the form Harbor components accept.
    pub fn url(&self, password: Option<&str>) -> String {
        let auth = match password {
            Some(p) if !p.is_empty() => format!(":{p}@"),
            _ => String::new(),
        };
        let scheme = if self.certificate_ref.is_some() { "rediss" } else { "redis" };
        match &self.server.sentinel_master_set {
            Some(master) => format!(
                "redis+sentinel://{auth}{}:{}/{master}/{}",
                self.server.host,
                self.server.port(),
                self.database
            ),
            None => format!(
                "{scheme}://{auth}{}:{}/{}",
                self.server.host,
                self.server.port(),
                self.database
            ),
        }
    }

    /// `host:port` without credentials or database.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RedisSpec {
        RedisSpec {
            server: RedisServer {
                host: "redis".to_string(),
                port: None,
                sentinel_master_set: None,
            },
            password_ref: Some("redis-pw".to_string()),
            certificate_ref: None,
        }
    }

    #[test]
    fn test_components_get_their_index() {
        let redis = spec();
        assert_eq!(redis.connection_for(ComponentName::Core).unwrap().database, 0);
        assert_eq!(redis.connection_for(ComponentName::Trivy).unwrap().database, 5);
        assert!(redis.connection_for(ComponentName::Portal).is_none());
    }

    #[test]
    fn test_url() {
        let conn = spec().connection_for(ComponentName::JobService).unwrap();
        assert_eq!(conn.url(Some("pw")), "redis://:pw@redis:6379/1");
        assert_eq!(conn.url(None), "redis://redis:6379/1");
    }

    #[test]
    fn test_sentinel_url() {
        let mut redis = spec();
        redis.server.sentinel_master_set = Some("mymaster".to_string());
        redis.server.port = Some(26379);
        let conn = redis.connection_for(ComponentName::ChartMuseum).unwrap();
        assert_eq!(conn.url(None), "redis+sentinel://redis:26379/mymaster/3");
    }

    #[test]
    fn test_flattened_server_fields() {
        let redis: RedisSpec =
            serde_json::from_str(r#"{"host":"r","port":6380,"passwordRef":"p"}"#).unwrap();
        assert_eq!(redis.server.port(), 6380);
        assert_eq!(redis.password_ref.as_deref(), Some("p"));
    }
}
