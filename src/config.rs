//! Operator configuration from the environment

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::error::{Error, Result};

pub const DEFAULT_MANIFEST_DIR: &str = "/bindata/network";
pub const DEFAULT_PLATFORM_TYPE: &str = "None";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 180;

/// Settings the operator process is started with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Leader election identity
    pub pod_name: Option<String>,
    /// Namespace holding the leader election lease
    pub pod_namespace: Option<String>,
    /// Directory of manifests fed to the renderer
    pub manifest_dir: PathBuf,
    /// Infrastructure platform, e.g. `AWS` or `None`
    pub platform_type: String,
    pub feature_gates: BTreeSet<String>,
    pub health_port: u16,
    /// Requeue interval after a successful pass
    pub reconcile_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: None,
            manifest_dir: PathBuf::from(DEFAULT_MANIFEST_DIR),
            platform_type: DEFAULT_PLATFORM_TYPE.to_string(),
            feature_gates: BTreeSet::new(),
            health_port: DEFAULT_HEALTH_PORT,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset and empty are the same
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let health_port = match var("HEALTH_PORT") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("HEALTH_PORT {:?} is not a port", v)))?,
            None => defaults.health_port,
        };
        let reconcile_interval = match var("RECONCILE_INTERVAL_SECS") {
            Some(v) => {
                let secs: u64 = v.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("RECONCILE_INTERVAL_SECS {:?} is not a number", v))
                })?;
                if secs == 0 {
                    return Err(Error::InvalidConfig(
                        "RECONCILE_INTERVAL_SECS must be positive".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.reconcile_interval,
        };

        Ok(Self {
            pod_name: var("POD_NAME"),
            pod_namespace: var("POD_NAMESPACE"),
            manifest_dir: var("MANIFEST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_dir),
            platform_type: var("PLATFORM_TYPE").unwrap_or(defaults.platform_type),
            feature_gates: var("FEATURE_GATES")
                .map(|v| parse_feature_gates(&v))
                .unwrap_or_default(),
            health_port,
            reconcile_interval,
        })
    }
}

fn parse_feature_gates(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}
