//! Configuration file templates.
//!
//! Some components read a configuration file in addition to their
//! environment. Each has a built-in template; an operator may replace it with
//! `<controller>-controller-template-path`. Placeholders are written
//! `{{ NAME }}` and every placeholder must have a value.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Z0-9_]+)\s*\}\}").unwrap_or_else(|e| unreachable!("valid pattern: {e}")));

/// Fills every placeholder of `template`.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> Result<String, ControllerError> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            missing.push(caps[1].to_string());
            String::new()
        }
    });
    if !missing.is_empty() {
        missing.dedup();
        return Err(ControllerError::Template(format!(
            "no value for placeholder(s) {}",
            missing.join(", ")
        )));
    }
    Ok(rendered.into_owned())
}

/// Template text for `controller`: the configured file, or `builtin`.
pub async fn load(config: &OperatorConfig, controller: &str, builtin: &str) -> Result<String, ControllerError> {
    match config.template_path(controller) {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControllerError::Template(format!("cannot read {}: {e}", path.display()))),
        None => Ok(builtin.to_string()),
    }
}

/// Loads and renders in one step.
pub async fn render_for(
    config: &OperatorConfig,
    controller: &str,
    builtin: &str,
    values: &BTreeMap<&str, String>,
) -> Result<String, ControllerError> {
    render(&load(config, controller, builtin).await?, values)
}
