//! Operator configuration.
//!
//! The operator reads one YAML file:
//!
//! ```yaml
//! classname: blue
//! network-policies: true
//! images:
//!   core:
//!     "2.5.0": registry.local/goharbor/harbor-core:v2.5.0
//! pass-timeout: 10s
//! max-requeue-backoff: 5m
//! core-controller-max-reconcile: 2
//! core-controller-watch-children: true
//! core-controller-class: blue
//! core-controller-template-path: /etc/harbor-operator/templates/core.env
//! ```
//!
//! `ConfigStore` owns the current snapshot. A refresh task polls the file's
//! modification time and, when the parsed content changes, notifies every
//! controller through a `watch` channel so all aggregates get reconciled.

use crate::error::ControllerError;
use crds::{ComponentName, GoDuration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Controller name of the cluster reconciler in config keys.
pub const CLUSTER_CONTROLLER: &str = "harborcluster";

const KEY_SUFFIXES: [&str; 4] = [
    "-controller-max-reconcile",
    "-controller-watch-children",
    "-controller-class",
    "-controller-template-path",
];

fn default_pass_timeout() -> GoDuration {
    GoDuration::new("10s")
}

fn default_max_requeue_backoff() -> GoDuration {
    GoDuration::new("5m")
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperatorConfig {
    /// Class this operator instance handles; resources labelled with another
    /// class are left alone
    #[serde(default)]
    pub classname: String,

    /// Emit a NetworkPolicy pair per component
    #[serde(default)]
    pub network_policies: bool,

    /// Default images: component -> harbor version -> image
    #[serde(default)]
    pub images: BTreeMap<String, BTreeMap<String, String>>,

    /// Deadline of one reconciliation pass
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout: GoDuration,

    /// Ceiling of the transient error backoff
    #[serde(default = "default_max_requeue_backoff")]
    pub max_requeue_backoff: GoDuration,

    /// Per-controller keys (`<controller>-controller-<setting>`) and anything
    /// not recognised
    #[serde(flatten)]
    pub controllers: BTreeMap<String, serde_yaml::Value>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            classname: String::new(),
            network_policies: false,
            images: BTreeMap::new(),
            pass_timeout: default_pass_timeout(),
            max_requeue_backoff: default_max_requeue_backoff(),
            controllers: BTreeMap::new(),
        }
    }
}

/// Names accepted before `-controller-...` in config keys.
pub fn controller_names() -> impl Iterator<Item = &'static str> {
    std::iter::once(CLUSTER_CONTROLLER).chain(ComponentName::ALL.iter().map(ComponentName::as_str))
}

impl OperatorConfig {
    /// Parses and checks a configuration document.
    pub fn parse(text: &str) -> Result<Self, ControllerError> {
        let config: OperatorConfig = if text.trim().is_empty() {
            OperatorConfig::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ControllerError::InvalidConfig(e.to_string()))?
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ControllerError> {
        for (key, duration) in [
            ("pass-timeout", &self.pass_timeout),
            ("max-requeue-backoff", &self.max_requeue_backoff),
        ] {
            let parsed = duration
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("{key}: {e}")))?;
            if parsed.is_zero() {
                return Err(ControllerError::InvalidConfig(format!("{key} must be positive")));
            }
        }
        for name in controller_names() {
            let key = format!("{name}-controller-max-reconcile");
            if let Some(value) = self.controllers.get(&key) {
                match value.as_u64() {
                    Some(n) if n > 0 => {}
                    _ => {
                        return Err(ControllerError::InvalidConfig(format!(
                            "{key} must be a positive integer"
                        )));
                    }
                }
            }
            let key = format!("{name}-controller-watch-children");
            if let Some(value) = self.controllers.get(&key) {
                if value.as_bool().is_none() {
                    return Err(ControllerError::InvalidConfig(format!("{key} must be a boolean")));
                }
            }
            for suffix in ["-controller-class", "-controller-template-path"] {
                let key = format!("{name}{suffix}");
                if let Some(value) = self.controllers.get(&key) {
                    if value.as_str().is_none() {
                        return Err(ControllerError::InvalidConfig(format!("{key} must be a string")));
                    }
                }
            }
        }
        Ok(())
    }

    fn controller_value(&self, controller: &str, suffix: &str) -> Option<&serde_yaml::Value> {
        self.controllers.get(&format!("{controller}{suffix}"))
    }

    /// Concurrent passes allowed for a controller (at least 1).
    pub fn max_reconcile(&self, controller: &str) -> usize {
        self.controller_value(controller, "-controller-max-reconcile")
            .and_then(serde_yaml::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(1)
            .max(1)
    }

    /// Whether the controller also watches the children it owns.
    pub fn watch_children(&self, controller: &str) -> bool {
        self.controller_value(controller, "-controller-watch-children")
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(true)
    }

    /// Class handled by a controller, falling back to `classname`.
    pub fn class(&self, controller: &str) -> &str {
        self.controller_value(controller, "-controller-class")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or(&self.classname)
    }

    /// Template overriding the built-in one for a controller.
    pub fn template_path(&self, controller: &str) -> Option<&Path> {
        self.controller_value(controller, "-controller-template-path")
            .and_then(serde_yaml::Value::as_str)
            .map(Path::new)
    }

    /// Keys neither declared nor of the `<controller>-controller-<setting>` form.
    pub fn unknown_keys(&self) -> Vec<&str> {
        self.controllers
            .keys()
            .filter(|key| {
                !controller_names().any(|name| {
                    key.strip_prefix(name)
                        .is_some_and(|rest| KEY_SUFFIXES.contains(&rest))
                })
            })
            .map(String::as_str)
            .collect()
    }

    /// Configured default image for a component at a Harbor version.
    pub fn image(&self, component: ComponentName, version: &str) -> Option<&str> {
        self.images
            .get(component.as_str())
            .and_then(|by_version| by_version.get(version))
            .map(String::as_str)
    }

    pub fn pass_timeout(&self) -> Duration {
        self.pass_timeout.parse().unwrap_or(Duration::from_secs(10))
    }

    pub fn max_requeue_backoff(&self) -> Duration {
        self.max_requeue_backoff.parse().unwrap_or(Duration::from_secs(300))
    }
}

/// Current configuration plus change notification.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<OperatorConfig>>,
    modified: Mutex<Option<SystemTime>>,
    changes: watch::Sender<()>,
    warm: AtomicBool,
}

impl ConfigStore {
    /// Loads the configuration file.
    ///
    /// A missing file yields the defaults; a file that does not parse is fatal.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ControllerError> {
        let path = path.into();
        let (config, modified) = match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let config = OperatorConfig::parse(&text)?;
                let modified = tokio::fs::metadata(&path).await?.modified().ok();
                (config, modified)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Configuration file {} not found, using defaults", path.display());
                (OperatorConfig::default(), None)
            }
            Err(e) => return Err(e.into()),
        };
        for key in config.unknown_keys() {
            warn!("Ignoring unknown configuration key {:?}", key);
        }

        let store = Self::new(Some(path), config, modified);
        store.warm.store(true, Ordering::Release);
        Ok(store)
    }

    /// Store holding a fixed configuration (no file behind it).
    pub fn from_config(config: OperatorConfig) -> Self {
        let store = Self::new(None, config, None);
        store.warm.store(true, Ordering::Release);
        store
    }

    fn new(path: Option<PathBuf>, config: OperatorConfig, modified: Option<SystemTime>) -> Self {
        let (changes, _) = watch::channel(());
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
            modified: Mutex::new(modified),
            changes,
            warm: AtomicBool::new(false),
        }
    }

    /// Current configuration.
    pub fn snapshot(&self) -> Arc<OperatorConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Receiver notified after every effective change.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.changes.subscribe()
    }

    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    /// Re-reads the file if its modification time moved.
    ///
    /// Returns whether the effective configuration changed. On a parse error
    /// the previous configuration stays in place.
    pub async fn refresh(&self) -> Result<bool, ControllerError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let modified = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Configuration file {} is gone, keeping current configuration", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        {
            let mut seen = self.modified.lock().unwrap_or_else(PoisonError::into_inner);
            if modified.is_some() && *seen == modified {
                return Ok(false);
            }
            *seen = modified;
        }

        let text = tokio::fs::read_to_string(path).await?;
        let config = OperatorConfig::parse(&text)?;
        if *self.snapshot() == config {
            return Ok(false);
        }
        for key in config.unknown_keys() {
            warn!("Ignoring unknown configuration key {:?}", key);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        self.changes.send_replace(());
        info!("Configuration reloaded from {}", path.display());
        Ok(true)
    }

    /// Polls the file every `interval` until `cancel` fires.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("Configuration reload failed, keeping previous configuration: {}", e);
                        }
                    }
                }
            }
        })
    }
}
