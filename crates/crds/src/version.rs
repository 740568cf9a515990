//! Harbor versions
//!
//! Clusters declare the Harbor version they run. The operator only deploys
//! versions it knows how to configure, and only moves a cluster along the
//! upgrade ladder Harbor itself supports: no downgrades, no major jumps, and
//! at most one minor version per step.

use once_cell::sync::Lazy;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Versions this operator can deploy.
pub const SUPPORTED_VERSIONS: &str = ">=2.1.0, <2.6.0";

/// Version used when rendering default images.
pub const DEFAULT_VERSION: &str = "2.5.0";

static SUPPORTED: Lazy<Option<VersionReq>> = Lazy::new(|| VersionReq::parse(SUPPORTED_VERSIONS).ok());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("{version:?} is not a valid semantic version: {reason}")]
    Invalid { version: String, reason: String },

    #[error("version {0} is not supported (supported: {SUPPORTED_VERSIONS})")]
    Unsupported(String),

    #[error("downgrade not allowed: {from} -> {to}")]
    Downgrade { from: String, to: String },

    #[error("major version upgrade not allowed: {from} -> {to}")]
    MajorUpgrade { from: String, to: String },

    #[error("upgrade from {from} to {to} skips a minor version")]
    SkipsMinor { from: String, to: String },
}

/// Parses a `MAJOR.MINOR.PATCH` version.
pub fn parse_version(version: &str) -> Result<Version, VersionError> {
    Version::parse(version).map_err(|e| VersionError::Invalid {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

pub fn is_supported(version: &Version) -> bool {
    SUPPORTED.as_ref().is_some_and(|req| req.matches(version))
}

/// Parses `version` and checks it against the supported set.
pub fn check_supported(version: &str) -> Result<Version, VersionError> {
    let parsed = parse_version(version)?;
    if !is_supported(&parsed) {
        return Err(VersionError::Unsupported(version.to_string()));
    }
    Ok(parsed)
}

/// Checks that moving from `from` to `to` is a legal step on the upgrade ladder.
pub fn check_upgrade(from: &str, to: &str) -> Result<(), VersionError> {
    let old = parse_version(from)?;
    let new = parse_version(to)?;

    if new < old {
        return Err(VersionError::Downgrade {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if new.major != old.major {
        return Err(VersionError::MajorUpgrade {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if new.minor > old.minor.saturating_add(1) {
        return Err(VersionError::SkipsMinor {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_range() {
        assert!(check_supported("2.1.0").is_ok());
        assert!(check_supported("2.3.2").is_ok());
        assert!(check_supported("2.5.1").is_ok());
        assert_eq!(
            check_supported("2.0.0"),
            Err(VersionError::Unsupported("2.0.0".to_string()))
        );
        assert!(matches!(check_supported("v2.3"), Err(VersionError::Invalid { .. })));
    }

    #[test]
    fn test_upgrade_ladder() {
        assert!(check_upgrade("2.1.2", "2.1.2").is_ok());
        assert!(check_upgrade("2.1.2", "2.1.5").is_ok());
        assert!(check_upgrade("2.1.2", "2.2.0").is_ok());
        assert!(matches!(
            check_upgrade("2.1.2", "2.3.0"),
            Err(VersionError::SkipsMinor { .. })
        ));
        assert!(matches!(
            check_upgrade("2.1.2", "3.0.0"),
            Err(VersionError::MajorUpgrade { .. })
        ));
    }

    #[test]
    fn test_largest_minor_does_not_overflow() {
        let top = format!("2.{}.0", u64::MAX);
        let patched = format!("2.{}.1", u64::MAX);
        assert!(check_upgrade(&top, &patched).is_ok());
        assert!(matches!(
            check_upgrade(&top, "3.0.0"),
            Err(VersionError::MajorUpgrade { .. })
        ));
    }

    #[test]
    fn test_downgrade_message() {
        let err = check_upgrade("2.3.0", "2.2.0").unwrap_err();
        assert!(err.to_string().contains("downgrade not allowed"));
    }
}
