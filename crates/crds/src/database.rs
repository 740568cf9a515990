//! PostgreSQL connection settings
//!
//! The cluster declares one PostgreSQL endpoint; each component that needs a
//! database receives a connection naming its own database (`core`,
//! `notaryserver`, `notarysigner`), optionally prefixed.

use crate::component::ComponentName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_POSTGRES_PORT: i32 = 5432;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresHost {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl PostgresHost {
    pub fn port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_POSTGRES_PORT)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

/// Cluster-level PostgreSQL endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub hosts: Vec<PostgresHost>,

    pub username: String,

    /// Secret of type `goharbor.io/postgresql`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Extra libpq parameters (`connect_timeout`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Prefix prepended to every database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl DatabaseSpec {
    /// Connection a component uses, `None` for components without a database.
    pub fn connection_for(&self, component: ComponentName) -> Option<PostgresConnection> {
        let database = component.database_name()?;
        Some(PostgresConnection {
            hosts: self.hosts.clone(),
            username: self.username.clone(),
            password_ref: self.password_ref.clone(),
            database: format!("{}{}", self.prefix.as_deref().unwrap_or_default(), database),
            ssl_mode: self.ssl_mode,
            parameters: self.parameters.clone(),
        })
    }
}

/// Connection to one database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConnection {
    pub hosts: Vec<PostgresHost>,

    pub username: String,

    /// Secret of type `goharbor.io/postgresql`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    pub database: String,

    #[serde(default)]
    pub ssl_mode: SslMode,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl PostgresConnection {
    /// First host, used by components that only accept a single endpoint.
    pub fn primary(&self) -> Option<&PostgresHost> {
        self.hosts.first()
    }

    /// libpq URL; the password is taken from `$(POSTGRESQL_PASSWORD)` when not given.
    pub fn dsn(&self, password: Option<&str>) -> String {
        let hosts = self
            .hosts
            .iter()
            .map(|h| format!("{}:{}", h.host, h.port()))
            .collect::<Vec<_>>()
            .join(",");
        let password = password.unwrap_or("$(POSTGRESQL_PASSWORD)");
        let mut params = BTreeMap::from([("sslmode".to_string(), self.ssl_mode.as_str().to_string())]);
        params.extend(self.parameters.clone());
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "postgres://{}:{}@{}/{}?{}",
            self.username, password, hosts, self.database, query
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DatabaseSpec {
        DatabaseSpec {
            hosts: vec![
                PostgresHost {
                    host: "pg-0".to_string(),
                    port: None,
                },
                PostgresHost {
                    host: "pg-1".to_string(),
                    port: Some(6432),
                },
            ],
            username: "harbor".to_string(),
            password_ref: Some("db-pw".to_string()),
            ssl_mode: SslMode::Require,
            parameters: BTreeMap::from([("connect_timeout".to_string(), "10".to_string())]),
            prefix: Some("prod_".to_string()),
        }
    }

    #[test]
    fn test_connection_names_the_component_database() {
        let db = spec();
        assert_eq!(db.connection_for(ComponentName::Core).unwrap().database, "prod_core");
        assert_eq!(
            db.connection_for(ComponentName::NotarySigner).unwrap().database,
            "prod_notarysigner"
        );
        assert!(db.connection_for(ComponentName::Portal).is_none());
    }

    #[test]
    fn test_dsn() {
        let conn = spec().connection_for(ComponentName::NotaryServer).unwrap();
        assert_eq!(
            conn.dsn(Some("pw")),
            "postgres://harbor:pw@pg-0:5432,pg-1:6432/prod_notaryserver?connect_timeout=10&sslmode=require"
        );
    }
}
