use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Network is the operator configuration for cluster networking
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "Network",
    plural = "networks",
    status = "NetworkStatus",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.defaultNetwork.type"}"#,
    printcolumn = r#"{"name":"Migration", "type":"string", "jsonPath":".spec.migration.networkType"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Pod network CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_network: Vec<ClusterNetworkEntry>,

    /// Service network CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_network: Vec<String>,

    /// The network plugin providing the pod network
    #[serde(default)]
    pub default_network: DefaultNetworkDefinition,

    /// Requested network-type migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<NetworkMigration>,

    /// Disable the network connectivity checks. A user toggle the operator
    /// never resets.
    #[serde(default)]
    pub disable_network_diagnostics: bool,
}

/// One pod network CIDR and the per-node prefix carved out of it
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_prefix: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct DefaultNetworkDefinition {
    #[serde(rename = "type")]
    pub type_: NetworkType,
}

/// Network plugin implementations
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum NetworkType {
    #[serde(rename = "OpenShiftSDN")]
    OpenShiftSdn,
    #[default]
    #[serde(rename = "OVNKubernetes")]
    OvnKubernetes,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::OpenShiftSdn => "OpenShiftSDN",
            NetworkType::OvnKubernetes => "OVNKubernetes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OpenShiftSDN" => Some(NetworkType::OpenShiftSdn),
            "OVNKubernetes" => Some(NetworkType::OvnKubernetes),
            _ => None,
        }
    }

    /// The other plugin
    pub fn counterpart(&self) -> Self {
        match self {
            NetworkType::OpenShiftSdn => NetworkType::OvnKubernetes,
            NetworkType::OvnKubernetes => NetworkType::OpenShiftSdn,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrator-declared migration intent
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMigration {
    /// Target network plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<NetworkType>,

    /// Live migration keeps the cluster running while both plugins coexist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MigrationMode>,

    /// Features whose configuration is translated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<MigrationFeatures>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum MigrationMode {
    Live,
    #[default]
    Offline,
}

/// Feature toggles; unset means enabled
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_firewall: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast: Option<bool>,
}

/// Status of the operator configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

const DEFAULT_CLUSTER_NETWORK: &str = "10.128.0.0/14";
const DEFAULT_HOST_PREFIX: u32 = 23;
const DEFAULT_SERVICE_NETWORK: &str = "172.30.0.0/16";

impl NetworkSpec {
    /// Fill unset fields with their defaults; returns whether anything changed
    pub fn fill_defaults(&mut self) -> bool {
        let mut changed = false;
        if self.cluster_network.is_empty() {
            self.cluster_network.push(ClusterNetworkEntry {
                cidr: DEFAULT_CLUSTER_NETWORK.to_string(),
                host_prefix: Some(DEFAULT_HOST_PREFIX),
            });
            changed = true;
        }
        for entry in self.cluster_network.iter_mut() {
            if entry.host_prefix.is_none() {
                entry.host_prefix = Some(DEFAULT_HOST_PREFIX);
                changed = true;
            }
        }
        if self.service_network.is_empty() {
            self.service_network.push(DEFAULT_SERVICE_NETWORK.to_string());
            changed = true;
        }
        changed
    }
}
