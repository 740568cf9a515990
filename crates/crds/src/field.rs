//! Field paths and field errors
//!
//! Admission and invariant checks report every violation against the path of
//! the offending field (`spec.imageChartStorage`, `spec.rules[0]`, ...), in the
//! same shape the API server uses for its own validation errors.

use std::fmt;

/// Dotted path to a field inside an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(String);

impl FieldPath {
    /// Path rooted at `name`.
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Path of the `spec` field.
    pub fn spec() -> Self {
        Self::root("spec")
    }

    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self::root(name)
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    pub fn key(&self, key: &str) -> Self {
        Self(format!("{}[{}]", self.0, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category of a field error, mirroring the API server's field error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Invalid,
    Forbidden,
    Duplicate,
    NotSupported,
    TooMany,
}

impl FieldErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldErrorKind::Required => "Required value",
            FieldErrorKind::Invalid => "Invalid value",
            FieldErrorKind::Forbidden => "Forbidden",
            FieldErrorKind::Duplicate => "Duplicate value",
            FieldErrorKind::NotSupported => "Unsupported value",
            FieldErrorKind::TooMany => "Too many",
        }
    }
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violation attached to a field path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {kind}: {detail}")]
pub struct FieldError {
    pub field: FieldPath,
    pub kind: FieldErrorKind,
    pub detail: String,
}

impl FieldError {
    pub fn new(field: FieldPath, kind: FieldErrorKind, detail: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            detail: detail.into(),
        }
    }

    pub fn required(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Required, detail)
    }

    pub fn invalid(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Invalid, detail)
    }

    pub fn forbidden(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Forbidden, detail)
    }

    pub fn duplicate(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Duplicate, detail)
    }

    pub fn not_supported(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::NotSupported, detail)
    }

    pub fn too_many(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::TooMany, detail)
    }
}

/// Every violation found by one admission or invariant check.
#[derive(Debug, Clone, PartialEq, Eq, Default, thiserror::Error)]
#[error("{}", render(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}
