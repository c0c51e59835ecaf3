//! Well-known names shared across the operator
//!
//! Annotation keys, label keys, namespaces, field managers and condition
//! types live here so that the apply engine, the migration code and the
//! reconciler agree on them.

/// Base field manager for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "cluster-network-operator";

/// Sub-controller used when the operator applies rendered manifests
pub const OPERCONFIG_SUBCONTROLLER: &str = "operconfig";

/// Sub-controller used for objects written by network-type migration
pub const MIGRATION_SUBCONTROLLER: &str = "network-migration";

/// Cluster identity used when an object carries no cluster-name annotation
pub const DEFAULT_CLUSTER_NAME: &str = "default";

/// Namespace the operator runs in and keeps its bookkeeping objects in
pub const OPERATOR_NAMESPACE: &str = "openshift-network-operator";

/// Name of the singleton operator configuration object
pub const OPERATOR_CONFIG_NAME: &str = "cluster";

/// Prefix of the applied-configuration ConfigMap (`applied-<name>`)
pub const APPLIED_PREFIX: &str = "applied-";

/// Data key holding the serialized applied configuration
pub const APPLIED_KEY: &str = "applied";

/// Annotation selecting the remote cluster an object is applied to
pub const CLUSTER_NAME_ANNOTATION: &str = "network.operator.openshift.io/cluster-name";

/// Annotation naming an existing object to use as a template
pub const COPY_FROM_ANNOTATION: &str = "network.operator.openshift.io/copy-from";

/// Only create the object; never update it afterwards
pub const CREATE_ONLY_ANNOTATION: &str = "networkoperator.openshift.io/create-only";

/// Never create or update; the object must be created by someone else
pub const CREATE_WAIT_ANNOTATION: &str = "networkoperator.openshift.io/create-wait";

/// Downgrade an apply failure for this object to a logged warning
pub const IGNORE_ERRORS_ANNOTATION: &str = "networkoperator.openshift.io/ignore-errors";

/// Restricts a rendered manifest to one network type
pub const NETWORK_TYPE_ANNOTATION: &str = "network.operator.openshift.io/network-type";

/// Server-computed revision annotation on Deployments
pub const DEPLOYMENT_REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Label selecting nodes that may host egress IPs under OVN-Kubernetes
pub const EGRESS_ASSIGNABLE_LABEL: &str = "k8s.ovn.org/egress-assignable";

/// Recovery annotation holding a node's original egress CIDRs
pub const EGRESS_CIDRS_RECOVERY_ANNOTATION: &str = "network.operator.openshift.io/egress-cidrs";

/// Recovery annotation holding a node's original egress IPs
pub const EGRESS_IPS_RECOVERY_ANNOTATION: &str = "network.operator.openshift.io/egress-ips";

/// Node annotation published by the cloud network config controller
pub const EGRESS_IPCONFIG_ANNOTATION: &str = "cloud.network.openshift.io/egress-ipconfig";

/// Namespace annotation enabling multicast under OVN-Kubernetes
pub const OVN_MULTICAST_ANNOTATION: &str = "k8s.ovn.org/multicast-enabled";

/// NetNamespace annotation enabling multicast under OpenShift SDN
pub const SDN_MULTICAST_ANNOTATION: &str = "netnamespace.network.openshift.io/multicast-enabled";

/// Well-known label carrying a namespace's own name
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Name every EgressFirewall must carry
pub const EGRESS_FIREWALL_NAME: &str = "default";

/// Name prefix of EgressIP objects created from NetNamespaces
pub const EGRESS_IP_PREFIX: &str = "egressip-";

/// Namespace and node DaemonSet of OVN-Kubernetes
pub const OVN_NAMESPACE: &str = "openshift-ovn-kubernetes";
pub const OVN_NODE_DAEMONSET: &str = "ovnkube-node";

/// Namespace and node DaemonSet of OpenShift SDN
pub const SDN_NAMESPACE: &str = "openshift-sdn";
pub const SDN_NODE_DAEMONSET: &str = "sdn";

/// Machine-config units inspected by the live-migration gates
pub const MTU_MIGRATION_UNIT: &str = "mtu-migration.service";
pub const OVS_CONFIGURATION_UNIT: &str = "ovs-configuration.service";

/// Live-migration condition types on the cluster network config
pub mod conditions {
    pub const MIGRATION_IN_PROGRESS: &str = "NetworkTypeMigrationInProgress";
    pub const MTU_READY: &str = "NetworkTypeMigrationMTUReady";
    pub const TARGET_CNI_AVAILABLE: &str = "NetworkTypeMigrationTargetCNIAvailable";
    pub const TARGET_CNI_IN_USE: &str = "NetworkTypeMigrationTargetCNIInUse";
    pub const ORIGINAL_CNI_PURGED: &str = "NetworkTypeMigrationOriginalCNIPurged";

    /// All live-migration condition types, umbrella first
    pub const ALL: [&str; 5] = [
        MIGRATION_IN_PROGRESS,
        MTU_READY,
        TARGET_CNI_AVAILABLE,
        TARGET_CNI_IN_USE,
        ORIGINAL_CNI_PURGED,
    ];
}
