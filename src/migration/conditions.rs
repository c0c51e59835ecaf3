//! Live-migration conditions
//!
//! While a live migration runs, four sub-conditions on the cluster network
//! config (`config.openshift.io/v1` Network `cluster`) record its progress:
//!
//! - MTU ready: every machine-config pool runs a rendered config carrying
//!   the MTU migration unit
//! - target CNI available: the target plugin's node DaemonSet is ready
//! - target CNI in use: every pool runs a rendered config that configures
//!   OVS for the target plugin
//! - original CNI purged: no DaemonSets remain in the original plugin's
//!   namespace
//!
//! The umbrella `NetworkTypeMigrationInProgress` condition tracks the
//! overall phase. Once all four hold, the conditions return to their idle
//! baseline and the target type is recorded as the running type.

use tracing::{debug, info, warn};

use super::MigrationIntent;
use super::state_machine::{
    MigrationContext, MigrationEvent, MigrationPhase, MigrationStateMachine, TransitionResult,
    determine_event,
};
use crate::apply::update_object;
use crate::controller::error::Result;
use crate::controller::retry::{RetryBackoff, retry_on_conflict};
use crate::controller::status::{ConditionBuilder, condition_status};
use crate::crd::{Condition, NetworkType};
use crate::document::Document;
use crate::names::conditions::{
    ALL, MIGRATION_IN_PROGRESS, MTU_READY, ORIGINAL_CNI_PURGED, TARGET_CNI_AVAILABLE,
    TARGET_CNI_IN_USE,
};
use crate::names::{
    DEFAULT_CLUSTER_NAME, MTU_MIGRATION_UNIT, OPERATOR_CONFIG_NAME, OVN_NAMESPACE,
    OVN_NODE_DAEMONSET, OVS_CONFIGURATION_UNIT, SDN_NAMESPACE, SDN_NODE_DAEMONSET,
};
use crate::store::{ObjectKey, ObjectStore, kinds};

/// Reasons used on the live-migration conditions
pub mod reasons {
    pub const STARTED: &str = "NetworkTypeMigrationStarted";
    pub const COMPLETED: &str = "NetworkTypeMigrationCompleted";
    pub const CANCELLED: &str = "NetworkTypeMigrationCancelled";
    pub const SATISFIED: &str = "ConditionSatisfied";
    pub const WAITING: &str = "WaitingForCondition";
    pub const MCP_UPDATING: &str = "MachineConfigPoolsUpdating";
    pub const MCP_DEGRADED: &str = "MachineConfigPoolsDegraded";
    pub const MCP_NOT_RENDERED: &str = "MachineConfigNotRendered";
}

/// Receives live-migration condition values for export
///
/// Implementations must forget previously exported conditions before
/// recording `values`, so a condition that is no longer reported does not
/// keep a stale value.
pub trait ConditionSink: Send + Sync {
    fn export_live_migration_conditions(&self, values: &[(&str, i64)]);
}

/// Gauge value for a condition status: 1 True, 0 False, -1 otherwise
pub fn gauge_value(status: Option<&str>) -> i64 {
    match status {
        Some(condition_status::TRUE) => 1,
        Some(condition_status::FALSE) => 0,
        _ => -1,
    }
}

// ---------------------------------------------------------------------------
// Machine-config gates
// ---------------------------------------------------------------------------

/// Predicate over a rendered MachineConfig
pub trait ConfigUnitMatcher: Send + Sync {
    fn matches(&self, machine_config: &Document) -> Result<bool>;
}

/// Matches a MachineConfig enabling a systemd unit whose contents contain
/// a given fragment
#[derive(Clone, Debug)]
pub struct SystemdUnitMatcher {
    pub unit: String,
    pub contents: Option<String>,
}

impl SystemdUnitMatcher {
    /// The MTU migration unit is enabled
    pub fn mtu_migration() -> Self {
        Self {
            unit: MTU_MIGRATION_UNIT.to_string(),
            contents: None,
        }
    }

    /// OVS is configured for `network_type`
    pub fn ovs_configuration(network_type: NetworkType) -> Self {
        Self {
            unit: OVS_CONFIGURATION_UNIT.to_string(),
            contents: Some(format!("NETWORK_TYPE={}", network_type)),
        }
    }
}

impl ConfigUnitMatcher for SystemdUnitMatcher {
    fn matches(&self, machine_config: &Document) -> Result<bool> {
        let Some(units) = machine_config.get_slice(&["spec", "config", "systemd", "units"])? else {
            return Ok(false);
        };
        Ok(units.iter().any(|unit| {
            let name = unit.get("name").and_then(|v| v.as_str());
            let enabled = unit.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
            let contents = unit.get("contents").and_then(|v| v.as_str()).unwrap_or("");
            name == Some(self.unit.as_str())
                && enabled
                && self
                    .contents
                    .as_deref()
                    .is_none_or(|fragment| contents.contains(fragment))
        }))
    }
}

/// Outcome of evaluating one gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateResult {
    pub satisfied: bool,
    pub reason: &'static str,
    pub message: String,
}

impl GateResult {
    fn satisfied(message: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            reason: reasons::SATISFIED,
            message: message.into(),
        }
    }

    fn unsatisfied(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason,
            message: message.into(),
        }
    }

    fn status(&self) -> &'static str {
        if self.satisfied {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        }
    }
}

fn pool_condition_true(pool: &Document, type_: &str) -> Result<bool> {
    let conditions = pool.get_slice(&["status", "conditions"])?;
    Ok(conditions.is_some_and(|list| {
        list.iter().any(|c| {
            c.get("type").and_then(|v| v.as_str()) == Some(type_)
                && c.get("status").and_then(|v| v.as_str()) == Some(condition_status::TRUE)
        })
    }))
}

/// Evaluate the machine-config gates for every pool
///
/// A pool passes when its desired rendered config is the one it runs, that
/// config satisfies `matcher`, it is not updating and it is not degraded.
pub async fn machine_config_gate(
    store: &dyn ObjectStore,
    matcher: &dyn ConfigUnitMatcher,
) -> Result<GateResult> {
    let pools = store
        .list(
            DEFAULT_CLUSTER_NAME,
            &kinds::machine_config_pool(),
            None,
            None,
        )
        .await?;
    if pools.is_empty() {
        return Ok(GateResult::unsatisfied(
            reasons::MCP_NOT_RENDERED,
            "no machine config pools found",
        ));
    }

    for pool in &pools {
        let desired = pool.get_string(&["spec", "configuration", "name"])?;
        let current = pool.get_string(&["status", "configuration", "name"])?;
        let Some(desired) = desired.filter(|d| Some(d) == current.as_ref()) else {
            return Ok(GateResult::unsatisfied(
                reasons::MCP_UPDATING,
                format!(
                    "pool {} has not rolled out its rendered config",
                    pool.name()
                ),
            ));
        };

        let key = ObjectKey::local(kinds::machine_config(), None, &desired);
        let rendered = store.get(&key).await?;
        if !rendered
            .as_ref()
            .map(|mc| matcher.matches(mc))
            .transpose()?
            .unwrap_or(false)
        {
            return Ok(GateResult::unsatisfied(
                reasons::MCP_NOT_RENDERED,
                format!(
                    "rendered config {} of pool {} does not match",
                    desired,
                    pool.name()
                ),
            ));
        }

        let machines = pool.get_i64(&["status", "machineCount"])?.unwrap_or(0);
        let updated = pool.get_i64(&["status", "updatedMachineCount"])?.unwrap_or(0);
        if pool_condition_true(pool, "Updating")? || updated != machines {
            return Ok(GateResult::unsatisfied(
                reasons::MCP_UPDATING,
                format!(
                    "pool {} is updating ({}/{} machines)",
                    pool.name(),
                    updated,
                    machines
                ),
            ));
        }
        if pool_condition_true(pool, "Degraded")? {
            return Ok(GateResult::unsatisfied(
                reasons::MCP_DEGRADED,
                format!("pool {} is degraded", pool.name()),
            ));
        }
    }
    Ok(GateResult::satisfied("all machine config pools are updated"))
}

fn node_daemonset(network_type: NetworkType) -> (&'static str, &'static str) {
    match network_type {
        NetworkType::OvnKubernetes => (OVN_NAMESPACE, OVN_NODE_DAEMONSET),
        NetworkType::OpenShiftSdn => (SDN_NAMESPACE, SDN_NODE_DAEMONSET),
    }
}

/// The plugin's node DaemonSet exists and every scheduled pod is ready and updated
pub async fn cni_available(
    store: &dyn ObjectStore,
    network_type: NetworkType,
) -> Result<GateResult> {
    let (namespace, name) = node_daemonset(network_type);
    let key = ObjectKey::local(kinds::daemon_set(), Some(namespace), name);
    let Some(ds) = store.get(&key).await? else {
        return Ok(GateResult::unsatisfied(
            reasons::WAITING,
            format!("DaemonSet {}/{} does not exist", namespace, name),
        ));
    };
    let desired = ds.get_i64(&["status", "desiredNumberScheduled"])?.unwrap_or(0);
    let ready = ds.get_i64(&["status", "numberReady"])?.unwrap_or(0);
    let updated = ds.get_i64(&["status", "updatedNumberScheduled"])?.unwrap_or(0);
    if desired > 0 && ready == desired && updated == desired {
        Ok(GateResult::satisfied(format!("DaemonSet {}/{} is ready", namespace, name)))
    } else {
        Ok(GateResult::unsatisfied(
            reasons::WAITING,
            format!(
                "DaemonSet {}/{} has {}/{} pods ready",
                namespace, name, ready, desired
            ),
        ))
    }
}

/// No DaemonSets remain in the plugin's namespace
pub async fn cni_purged(store: &dyn ObjectStore, network_type: NetworkType) -> Result<GateResult> {
    let (namespace, _) = node_daemonset(network_type);
    let remaining = store
        .list(
            DEFAULT_CLUSTER_NAME,
            &kinds::daemon_set(),
            Some(namespace),
            None,
        )
        .await?;
    if remaining.is_empty() {
        Ok(GateResult::satisfied(format!("no DaemonSets left in {}", namespace)))
    } else {
        Ok(GateResult::unsatisfied(
            reasons::WAITING,
            format!("{} DaemonSets left in {}", remaining.len(), namespace),
        ))
    }
}

// ---------------------------------------------------------------------------
// Condition bookkeeping
// ---------------------------------------------------------------------------

/// Live-migration conditions as stored on the cluster network config
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveMigrationConditions {
    pub conditions: Vec<Condition>,
}

impl LiveMigrationConditions {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let conditions = match doc.get(&["status", "conditions"]) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };
        Ok(Self { conditions })
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn status_of(&self, type_: &str) -> Option<&str> {
        self.get(type_).map(|c| c.status.as_str())
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.status_of(type_) == Some(condition_status::TRUE)
    }

    /// Phase recorded by the umbrella condition
    pub fn phase(&self) -> MigrationPhase {
        match self.get(MIGRATION_IN_PROGRESS) {
            Some(c) if c.status == condition_status::TRUE => MigrationPhase::InProgress,
            Some(c) if c.status == condition_status::FALSE && c.reason == reasons::COMPLETED => {
                MigrationPhase::Completed
            }
            _ => MigrationPhase::NotStarted,
        }
    }

    /// Gauge values for every live-migration condition type
    pub fn gauge_values(&self) -> Vec<(&'static str, i64)> {
        ALL.iter()
            .map(|type_| (*type_, gauge_value(self.status_of(type_))))
            .collect()
    }

    fn builder(&self) -> ConditionBuilder {
        ConditionBuilder::from_existing(self.conditions.clone(), None)
    }

    /// Umbrella True, sub-conditions from the gates
    fn in_progress(&self, gates: &[(&str, GateResult)]) -> Self {
        let mut builder = self.builder().set_condition(
            MIGRATION_IN_PROGRESS,
            condition_status::TRUE,
            reasons::STARTED,
            "network type live migration is in progress",
        );
        for (type_, gate) in gates {
            builder = builder.set_condition(type_, gate.status(), gate.reason, &gate.message);
        }
        Self {
            conditions: builder.build(),
        }
    }

    /// Umbrella False with `reason`, sub-conditions Unknown
    fn idle(&self, reason: &str, message: &str) -> Self {
        let mut builder = self.builder().set_condition(
            MIGRATION_IN_PROGRESS,
            condition_status::FALSE,
            reason,
            message,
        );
        for type_ in &ALL[1..] {
            builder = builder.set_condition(type_, condition_status::UNKNOWN, reason, message);
        }
        Self {
            conditions: builder.build(),
        }
    }

    /// Same condition statuses and reasons, ignoring timestamps
    fn same_as(&self, other: &Self) -> bool {
        ALL.iter().all(|type_| {
            let a = self.get(type_).map(|c| (&c.status, &c.reason, &c.message));
            let b = other.get(type_).map(|c| (&c.status, &c.reason, &c.message));
            a == b
        })
    }
}

fn cluster_config_key() -> ObjectKey {
    ObjectKey::local(kinds::cluster_network(), None, OPERATOR_CONFIG_NAME)
}

/// Running network type as reported by the cluster network config
pub fn running_network_type(cluster_config: &Document) -> Result<Option<NetworkType>> {
    Ok(cluster_config
        .get_string(&["status", "networkType"])?
        .as_deref()
        .and_then(NetworkType::parse))
}

async fn evaluate_gates(
    store: &dyn ObjectStore,
    target: NetworkType,
) -> Result<Vec<(&'static str, GateResult)>> {
    let mtu = machine_config_gate(store, &SystemdUnitMatcher::mtu_migration()).await?;
    let available = cni_available(store, target).await?;
    let in_use = machine_config_gate(store, &SystemdUnitMatcher::ovs_configuration(target)).await?;
    let purged = cni_purged(store, target.counterpart()).await?;
    Ok(vec![
        (MTU_READY, mtu),
        (TARGET_CNI_AVAILABLE, available),
        (TARGET_CNI_IN_USE, in_use),
        (ORIGINAL_CNI_PURGED, purged),
    ])
}

/// Advance the live-migration conditions by one step and export them
///
/// Reads the cluster network config, runs the global migration machine,
/// writes the resulting conditions back when they changed and hands the
/// final values to `sink`. Returns the phase after this step.
pub async fn refresh_live_migration_conditions(
    store: &dyn ObjectStore,
    intent: Option<&MigrationIntent>,
    sink: &dyn ConditionSink,
) -> Result<MigrationPhase> {
    let key = cluster_config_key();
    let Some(config) = store.get(&key).await? else {
        debug!("cluster network config not found, nothing to track");
        sink.export_live_migration_conditions(&LiveMigrationConditions::default().gauge_values());
        return Ok(MigrationPhase::NotStarted);
    };

    let current = LiveMigrationConditions::from_document(&config)?;
    let phase = current.phase();
    let running = running_network_type(&config)?;
    let live = intent.filter(|i| i.is_live());

    let mut ctx = MigrationContext {
        live_intent: live.is_some(),
        target_differs: live.is_some_and(|i| Some(i.target) != running),
        ..Default::default()
    };
    let gates = match live {
        Some(intent) if ctx.target_differs || phase == MigrationPhase::InProgress => {
            let gates = evaluate_gates(store, intent.target).await?;
            ctx.mtu_ready = gates[0].1.satisfied;
            ctx.target_cni_available = gates[1].1.satisfied;
            ctx.target_cni_in_use = gates[2].1.satisfied;
            ctx.original_cni_purged = gates[3].1.satisfied;
            gates
        }
        _ => Vec::new(),
    };

    let event = determine_event(phase, &ctx);
    if event == MigrationEvent::Idle {
        sink.export_live_migration_conditions(&current.gauge_values());
        return Ok(phase);
    }

    let machine = MigrationStateMachine::new();
    let (next_phase, updated, record_target) = match machine.transition(phase, event, &ctx) {
        TransitionResult::Success { to, description, .. } => {
            info!("live migration {} -> {}: {}", phase, to, description);
            match to {
                MigrationPhase::InProgress => (to, current.in_progress(&gates), None),
                MigrationPhase::Completed => (
                    to,
                    current.idle(reasons::COMPLETED, "network type live migration completed"),
                    live.map(|i| i.target),
                ),
                MigrationPhase::NotStarted => (
                    to,
                    current.idle(
                        reasons::CANCELLED,
                        "network type live migration was cancelled",
                    ),
                    None,
                ),
            }
        }
        TransitionResult::GuardFailed { reason, .. } => {
            warn!("live migration {} on {} rejected: {}", event, phase, reason);
            (phase, current.clone(), None)
        }
        TransitionResult::InvalidTransition { .. } => {
            warn!("no live migration transition for {} in {}", event, phase);
            (phase, current.clone(), None)
        }
    };

    if !updated.same_as(&current) || record_target.is_some() {
        write_conditions(store, &key, &updated, record_target).await?;
    }
    sink.export_live_migration_conditions(&updated.gauge_values());
    Ok(next_phase)
}

async fn write_conditions(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    conditions: &LiveMigrationConditions,
    running: Option<NetworkType>,
) -> Result<()> {
    let field_manager = super::migration_field_manager();
    let fm = field_manager.as_str();
    let value = serde_json::to_value(&conditions.conditions)?;
    let value = &value;
    retry_on_conflict(&RetryBackoff::default(), move || async move {
        let Some(mut config) = store.get(key).await? else {
            return Ok(());
        };
        config.set(&["status", "conditions"], value.clone())?;
        if let Some(network_type) = running {
            config.set_string(&["status", "networkType"], network_type.as_str())?;
        }
        update_object(store, &config, Some("status"), fm).await?;
        Ok(())
    })
    .await
}
