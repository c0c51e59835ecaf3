//! Builders for the objects the operator reads and writes
//!
//! Everything is expressed as [`Document`]s so tests can seed a
//! [`MemoryStore`] exactly like an API server would hold them.
//!
//! ```rust,ignore
//! let store = MemoryStore::new();
//! store.insert(node("worker-0")).unwrap();
//! store.insert(host_subnet("worker-0", &[], &["10.0.128.0/17"])).unwrap();
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use serde_json::{Value, json};

use network_operator::Result;
use network_operator::crd::{
    ClusterNetworkEntry, DefaultNetworkDefinition, Network, NetworkSpec, NetworkType,
};
use network_operator::document::Document;
use network_operator::migration::ConditionSink;
use network_operator::render::{RenderInput, Renderer};

// =============================================================================
// Core objects
// =============================================================================

pub fn doc(value: Value) -> Document {
    Document::from_value(value).expect("fixture must be a JSON object")
}

pub fn node(name: &str) -> Document {
    Document::named("v1", "Node", None, name)
}

pub fn namespace(name: &str) -> Document {
    doc(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": {"kubernetes.io/metadata.name": name}
        }
    }))
}

pub fn config_map(namespace: &str, name: &str, data: Value) -> Document {
    doc(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": namespace},
        "data": data
    }))
}

pub fn service(namespace: &str, name: &str, spec: Value) -> Document {
    doc(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": namespace},
        "spec": spec
    }))
}

pub fn daemon_set(namespace: &str, name: &str, desired: i64, ready: i64) -> Document {
    doc(json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": {"name": name, "namespace": namespace},
        "status": {
            "desiredNumberScheduled": desired,
            "numberReady": ready,
            "updatedNumberScheduled": ready
        }
    }))
}

// =============================================================================
// OpenShift SDN objects
// =============================================================================

fn strings(values: &[&str]) -> Value {
    Value::from(values.iter().map(|v| v.to_string()).collect::<Vec<_>>())
}

/// HostSubnet for `host`; empty slices leave the egress fields unset
pub fn host_subnet(host: &str, egress_ips: &[&str], egress_cidrs: &[&str]) -> Document {
    let mut obj = doc(json!({
        "apiVersion": "network.openshift.io/v1",
        "kind": "HostSubnet",
        "metadata": {"name": host},
        "host": host,
        "subnet": "10.129.0.0/23"
    }));
    if !egress_ips.is_empty() {
        obj.set(&["egressIPs"], strings(egress_ips)).unwrap();
    }
    if !egress_cidrs.is_empty() {
        obj.set(&["egressCIDRs"], strings(egress_cidrs)).unwrap();
    }
    obj
}

pub fn net_namespace(name: &str, egress_ips: &[&str]) -> Document {
    let mut obj = doc(json!({
        "apiVersion": "network.openshift.io/v1",
        "kind": "NetNamespace",
        "metadata": {"name": name},
        "netname": name,
        "netid": 0
    }));
    if !egress_ips.is_empty() {
        obj.set(&["egressIPs"], strings(egress_ips)).unwrap();
    }
    obj
}

pub fn cloud_private_ip_config(ip: &str, node: &str) -> Document {
    doc(json!({
        "apiVersion": "cloud.network.openshift.io/v1",
        "kind": "CloudPrivateIPConfig",
        "metadata": {"name": ip.replace(':', ".")},
        "spec": {"node": node}
    }))
}

// =============================================================================
// Live migration
// =============================================================================

/// Cluster network config reporting `running` as the network type
pub fn cluster_config(running: NetworkType) -> Document {
    doc(json!({
        "apiVersion": "config.openshift.io/v1",
        "kind": "Network",
        "metadata": {"name": "cluster"},
        "spec": {},
        "status": {"networkType": running.as_str()}
    }))
}

/// Rendered MachineConfig carrying the MTU migration and OVS units
pub fn rendered_machine_config(name: &str, ovs_network_type: NetworkType) -> Document {
    doc(json!({
        "apiVersion": "machineconfiguration.openshift.io/v1",
        "kind": "MachineConfig",
        "metadata": {"name": name},
        "spec": {"config": {"systemd": {"units": [
            {"name": "mtu-migration.service", "enabled": true},
            {
                "name": "ovs-configuration.service",
                "enabled": true,
                "contents": format!("[Service]\nEnvironment=NETWORK_TYPE={}\n", ovs_network_type)
            }
        ]}}}
    }))
}

/// Pool fully rolled out to `rendered`
pub fn machine_config_pool(name: &str, rendered: &str) -> Document {
    doc(json!({
        "apiVersion": "machineconfiguration.openshift.io/v1",
        "kind": "MachineConfigPool",
        "metadata": {"name": name},
        "spec": {"configuration": {"name": rendered}},
        "status": {
            "configuration": {"name": rendered},
            "machineCount": 3,
            "updatedMachineCount": 3,
            "conditions": [
                {"type": "Updating", "status": "False"},
                {"type": "Degraded", "status": "False"}
            ]
        }
    }))
}

/// Records every export so tests can check the reset contract
#[derive(Default)]
pub struct RecordingSink {
    pub exports: Mutex<Vec<Vec<(String, i64)>>>,
}

impl RecordingSink {
    pub fn last(&self) -> Vec<(String, i64)> {
        self.exports.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn value_of(&self, condition: &str) -> Option<i64> {
        self.last()
            .into_iter()
            .find(|(c, _)| c == condition)
            .map(|(_, v)| v)
    }
}

impl ConditionSink for RecordingSink {
    fn export_live_migration_conditions(&self, values: &[(&str, i64)]) {
        self.exports.lock().unwrap().push(
            values
                .iter()
                .map(|(c, v)| (c.to_string(), *v))
                .collect(),
        );
    }
}

// =============================================================================
// Managed fields
// =============================================================================

/// Ownership record with an explicit `FieldsV1` trie
pub fn managed_entry(
    manager: &str,
    operation: &str,
    api_version: &str,
    subresource: Option<&str>,
    fields: Value,
) -> ManagedFieldsEntry {
    ManagedFieldsEntry {
        api_version: Some(api_version.to_string()),
        manager: Some(manager.to_string()),
        operation: Some(operation.to_string()),
        subresource: subresource.map(str::to_string),
        fields_type: Some("FieldsV1".to_string()),
        fields_v1: Some(FieldsV1(fields)),
        time: None,
    }
}

pub fn managers_of(obj: &Document) -> Vec<(String, String)> {
    obj.managed_fields()
        .unwrap()
        .into_iter()
        .map(|e| (e.manager.unwrap_or_default(), e.operation.unwrap_or_default()))
        .collect()
}

// =============================================================================
// Operator configuration
// =============================================================================

pub fn network_spec(network_type: NetworkType) -> NetworkSpec {
    NetworkSpec {
        cluster_network: vec![ClusterNetworkEntry {
            cidr: "10.128.0.0/14".to_string(),
            host_prefix: Some(23),
        }],
        service_network: vec!["172.30.0.0/16".to_string()],
        default_network: DefaultNetworkDefinition {
            type_: network_type,
        },
        migration: None,
        disable_network_diagnostics: false,
    }
}

pub fn operator_network(spec: NetworkSpec) -> Network {
    let mut network = Network::new("cluster", spec);
    network.metadata.generation = Some(1);
    network
}

/// Operator `Network` as stored, for seeding a store
pub fn operator_network_document(network: &Network) -> Document {
    let value = serde_json::to_value(network).unwrap();
    Document::from_value(value).unwrap()
}

/// Renderer returning a fixed object list
pub struct StaticRenderer {
    pub objects: Vec<Document>,
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, _input: &RenderInput<'_>) -> Result<Vec<Document>> {
        Ok(self.objects.clone())
    }
}
