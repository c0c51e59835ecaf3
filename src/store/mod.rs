//! Object store facade
//!
//! Everything the operator reads or writes goes through [`ObjectStore`]. The
//! production implementation is [`KubeStore`]; [`MemoryStore`] keeps objects
//! in process and is used by tests.

pub mod kube_store;
pub mod memory;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::controller::error::Result;
use crate::document::Document;
use crate::names::{CLUSTER_NAME_ANNOTATION, DEFAULT_CLUSTER_NAME};

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Identity of a stored object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub cluster: String,
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        cluster: &str,
        gvk: GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            gvk,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Key of an object on the default cluster
    pub fn local(gvk: GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        Self::new(DEFAULT_CLUSTER_NAME, gvk, namespace, name)
    }

    /// Key derived from a document's own identity and cluster annotation
    pub fn for_document(doc: &Document) -> Result<Self> {
        Ok(Self::new(
            cluster_name(doc),
            doc.gvk()?,
            doc.namespace(),
            doc.name(),
        ))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}, Kind={} {}/{}",
            self.gvk.group,
            self.gvk.version,
            self.gvk.kind,
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }
}

/// The addressable collection a kind maps to
#[derive(Clone, Debug)]
pub struct ResourceMapping {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

/// Cluster an object is routed to; defaults when the annotation is absent
pub fn cluster_name(doc: &Document) -> &str {
    doc.annotation(CLUSTER_NAME_ANNOTATION)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_CLUSTER_NAME)
}

/// Trait abstracting access to the remote declarative object store
///
/// All objects travel as [`Document`]s. `get` returns `Ok(None)` for absent
/// objects; other operations report absence as `Error::NotFound` (or the
/// equivalent API error) and optimistic-concurrency failures as conflicts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether a cluster with this name is known
    fn has_cluster(&self, cluster: &str) -> bool;

    /// Map a kind to its resource collection; `None` when the kind is unknown
    async fn resolve(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
    ) -> Result<Option<ResourceMapping>>;

    /// Fetch one object
    async fn get(&self, key: &ObjectKey) -> Result<Option<Document>>;

    /// List all objects of a kind, following continuation tokens
    async fn list(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Document>>;

    /// Create a new object
    async fn create(&self, cluster: &str, obj: &Document, field_manager: &str)
    -> Result<Document>;

    /// Replace an object (or one of its subresources), guarded by its resourceVersion
    async fn update(
        &self,
        cluster: &str,
        obj: &Document,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document>;

    /// Server-side apply
    async fn apply(
        &self,
        key: &ObjectKey,
        obj: &Document,
        field_manager: &str,
        force: bool,
        subresources: &[String],
    ) -> Result<Document>;

    /// RFC 6902 JSON patch
    async fn json_patch(&self, key: &ObjectKey, patch: &Value, field_manager: &str)
    -> Result<Document>;

    /// RFC 7386 merge patch
    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document>;

    /// Delete an object; returns whether anything was deleted
    async fn delete(&self, key: &ObjectKey) -> Result<bool>;
}

/// Well-known kinds used throughout the operator
pub mod kinds {
    use kube::api::GroupVersionKind;

    pub fn namespace() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "Namespace")
    }

    pub fn node() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "Node")
    }

    pub fn config_map() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "ConfigMap")
    }

    pub fn service() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "Service")
    }

    pub fn service_account() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "ServiceAccount")
    }

    pub fn daemon_set() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "DaemonSet")
    }

    pub fn deployment() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "Deployment")
    }

    pub fn operator_network() -> GroupVersionKind {
        GroupVersionKind::gvk("operator.openshift.io", "v1", "Network")
    }

    pub fn cluster_network() -> GroupVersionKind {
        GroupVersionKind::gvk("config.openshift.io", "v1", "Network")
    }

    pub fn host_subnet() -> GroupVersionKind {
        GroupVersionKind::gvk("network.openshift.io", "v1", "HostSubnet")
    }

    pub fn net_namespace() -> GroupVersionKind {
        GroupVersionKind::gvk("network.openshift.io", "v1", "NetNamespace")
    }

    pub fn egress_network_policy() -> GroupVersionKind {
        GroupVersionKind::gvk("network.openshift.io", "v1", "EgressNetworkPolicy")
    }

    pub fn egress_firewall() -> GroupVersionKind {
        GroupVersionKind::gvk("k8s.ovn.org", "v1", "EgressFirewall")
    }

    pub fn egress_ip() -> GroupVersionKind {
        GroupVersionKind::gvk("k8s.ovn.org", "v1", "EgressIP")
    }

    pub fn cloud_private_ip_config() -> GroupVersionKind {
        GroupVersionKind::gvk("cloud.network.openshift.io", "v1", "CloudPrivateIPConfig")
    }

    pub fn machine_config_pool() -> GroupVersionKind {
        GroupVersionKind::gvk(
            "machineconfiguration.openshift.io",
            "v1",
            "MachineConfigPool",
        )
    }

    pub fn machine_config() -> GroupVersionKind {
        GroupVersionKind::gvk("machineconfiguration.openshift.io", "v1", "MachineConfig")
    }

    pub fn network_attachment_definition() -> GroupVersionKind {
        GroupVersionKind::gvk("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition")
    }
}
