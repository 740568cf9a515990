//! Secret types consumed by Harbor components
//!
//! Every secret a resource references must carry one of these types and the
//! keys that type requires. The set is closed: components read values by key,
//! so an untyped or wrongly typed secret is rejected before anything is
//! deployed.

use k8s_openapi::api::core::v1::Secret;
use std::fmt;
use thiserror::Error;

/// Key holding a shared secret or password.
pub const SHARED_SECRET_KEY: &str = "secret";
/// Key holding an htpasswd file.
pub const HTPASSWD_KEY: &str = "htpasswd";
/// Key holding a Redis password.
pub const REDIS_PASSWORD_KEY: &str = "redis-password";
/// Key holding a PostgreSQL password.
pub const POSTGRESQL_PASSWORD_KEY: &str = "postgresql-password";
/// Key holding the CSRF key.
pub const CSRF_KEY: &str = "key";
/// Key holding the default notary signer alias passphrase.
pub const NOTARY_SIGNER_DEFAULT_ALIAS_KEY: &str = "default";
/// Key holding a GitHub user name.
pub const GITHUB_USER_KEY: &str = "github-user";
/// Key holding a GitHub token.
pub const GITHUB_TOKEN_KEY: &str = "github-token";
/// Key holding the registry HTTP secret.
pub const REGISTRY_HTTP_SECRET_KEY: &str = "REGISTRY_HTTP_SECRET";

/// Type of TLS secrets produced by cert-manager.
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretType {
    SingleSecret,
    HtPasswd,
    Redis,
    Postgresql,
    Csrf,
    NotarySignerAliases,
    Github,
    RegistryHttp,
}

impl SecretType {
    pub const ALL: [SecretType; 8] = [
        SecretType::SingleSecret,
        SecretType::HtPasswd,
        SecretType::Redis,
        SecretType::Postgresql,
        SecretType::Csrf,
        SecretType::NotarySignerAliases,
        SecretType::Github,
        SecretType::RegistryHttp,
    ];

    /// Value of the secret's `type` field.
    pub const fn type_name(&self) -> &'static str {
        match self {
            SecretType::SingleSecret => "goharbor.io/single-secret",
            SecretType::HtPasswd => "goharbor.io/htpasswd",
            SecretType::Redis => "goharbor.io/redis",
            SecretType::Postgresql => "goharbor.io/postgresql",
            SecretType::Csrf => "goharbor.io/csrf",
            SecretType::NotarySignerAliases => "goharbor.io/notary-signer-aliases",
            SecretType::Github => "goharbor.io/github",
            SecretType::RegistryHttp => "goharbor.io/registry",
        }
    }

    /// Keys a secret of this type must carry.
    pub const fn required_keys(&self) -> &'static [&'static str] {
        match self {
            SecretType::SingleSecret => &[SHARED_SECRET_KEY],
            SecretType::HtPasswd => &[HTPASSWD_KEY],
            SecretType::Redis => &[REDIS_PASSWORD_KEY],
            SecretType::Postgresql => &[POSTGRESQL_PASSWORD_KEY],
            SecretType::Csrf => &[CSRF_KEY],
            SecretType::NotarySignerAliases => &[NOTARY_SIGNER_DEFAULT_ALIAS_KEY],
            SecretType::Github => &[GITHUB_USER_KEY, GITHUB_TOKEN_KEY],
            SecretType::RegistryHttp => &[REGISTRY_HTTP_SECRET_KEY],
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_name() == name)
    }

    /// Checks the type and keys of `secret`.
    pub fn check(&self, secret: &Secret) -> Result<(), SecretTypeError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let found = secret.type_.clone().unwrap_or_default();
        if found != self.type_name() {
            return Err(SecretTypeError::WrongType {
                secret: name,
                expected: self.type_name(),
                found,
            });
        }
        for key in self.required_keys() {
            if secret_value(secret, key).is_none() {
                return Err(SecretTypeError::MissingKey {
                    secret: name,
                    key: (*key).to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretTypeError {
    #[error("secret {secret:?} has type {found:?}, expected {expected:?}")]
    WrongType {
        secret: String,
        expected: &'static str,
        found: String,
    },

    #[error("secret {secret:?} is missing key {key:?}")]
    MissingKey { secret: String, key: String },
}

/// Reads `key` from `data`, falling back to `stringData` for objects that have
/// not been round-tripped through the API server.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return String::from_utf8(value.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
}

/// Checks that `secret` is a TLS secret carrying a certificate and key.
pub fn check_tls(secret: &Secret) -> Result<(), SecretTypeError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let found = secret.type_.clone().unwrap_or_default();
    if found != TLS_SECRET_TYPE {
        return Err(SecretTypeError::WrongType {
            secret: name,
            expected: TLS_SECRET_TYPE,
            found,
        });
    }
    for key in [TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY] {
        if secret_value(secret, key).is_none() {
            return Err(SecretTypeError::MissingKey {
                secret: name,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Checks that `secret` carries a CA bundle.
pub fn check_ca_bundle(secret: &Secret) -> Result<(), SecretTypeError> {
    if secret_value(secret, CA_CERT_KEY).is_none() {
        return Err(SecretTypeError::MissingKey {
            secret: secret.metadata.name.clone().unwrap_or_default(),
            key: CA_CERT_KEY.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(type_: &str, keys: &[&str]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("creds".to_string()),
                ..Default::default()
            },
            type_: Some(type_.to_string()),
            data: Some(
                keys.iter()
                    .map(|k| (k.to_string(), ByteString(b"value".to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_type_names_are_unique_and_resolvable() {
        for t in SecretType::ALL {
            assert_eq!(SecretType::from_type_name(t.type_name()), Some(t));
        }
        assert_eq!(SecretType::from_type_name("Opaque"), None);
    }

    #[test]
    fn test_check_accepts_matching_secret() {
        let s = secret("goharbor.io/github", &[GITHUB_USER_KEY, GITHUB_TOKEN_KEY]);
        assert!(SecretType::Github.check(&s).is_ok());
    }

    #[test]
    fn test_check_rejects_wrong_type_and_missing_key() {
        let s = secret("Opaque", &[SHARED_SECRET_KEY]);
        assert!(matches!(
            SecretType::SingleSecret.check(&s),
            Err(SecretTypeError::WrongType { .. })
        ));

        let s = secret("goharbor.io/github", &[GITHUB_USER_KEY]);
        assert_eq!(
            SecretType::Github.check(&s),
            Err(SecretTypeError::MissingKey {
                secret: "creds".to_string(),
                key: GITHUB_TOKEN_KEY.to_string()
            })
        );
    }

    #[test]
    fn test_string_data_is_read() {
        let mut s = secret("goharbor.io/csrf", &[]);
        s.data = None;
        s.string_data = Some(BTreeMap::from([(CSRF_KEY.to_string(), "k".to_string())]));
        assert_eq!(secret_value(&s, CSRF_KEY).as_deref(), Some("k"));
        assert!(SecretType::Csrf.check(&s).is_ok());
    }
}
