//! Network-type migration
//!
//! Translates plugin-specific configuration between OpenShift SDN and
//! OVN-Kubernetes and tracks the live-migration conditions. Every
//! translation is idempotent: a pass that fails partway leaves earlier
//! translations in place and the next pass converges.

pub mod conditions;
pub mod egress_firewall;
pub mod egress_ip;
pub mod multicast;
pub mod state_machine;

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::apply::field_manager_for;
use crate::controller::error::{Error, Result};
use crate::controller::retry::{RetryBackoff, retry_on_conflict};
use crate::crd::{MigrationMode, NetworkSpec, NetworkType};
use crate::document::Document;
use crate::names::MIGRATION_SUBCONTROLLER;
use crate::store::{ObjectKey, ObjectStore};

pub use conditions::{
    ConditionSink, ConfigUnitMatcher, LiveMigrationConditions, SystemdUnitMatcher,
    refresh_live_migration_conditions,
};
pub use state_machine::{
    FeatureEvent, FeatureState, FeatureStateMachine, MigrationContext, MigrationEvent,
    MigrationPhase, MigrationStateMachine, TransitionResult, determine_event,
};

/// Which features are translated; all enabled unless switched off
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureToggles {
    pub egress_ip: bool,
    pub egress_firewall: bool,
    pub multicast: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            egress_ip: true,
            egress_firewall: true,
            multicast: true,
        }
    }
}

/// Migration requested on the operator configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationIntent {
    pub target: NetworkType,
    pub mode: MigrationMode,
    pub features: FeatureToggles,
}

impl MigrationIntent {
    pub fn new(target: NetworkType) -> Self {
        Self {
            target,
            mode: MigrationMode::Offline,
            features: FeatureToggles::default(),
        }
    }

    /// Intent declared in `spec.migration`, if a target type is set
    pub fn from_spec(spec: &NetworkSpec) -> Option<Self> {
        let migration = spec.migration.as_ref()?;
        let target = migration.network_type?;
        let features = migration
            .features
            .as_ref()
            .map(|f| FeatureToggles {
                egress_ip: f.egress_ip.unwrap_or(true),
                egress_firewall: f.egress_firewall.unwrap_or(true),
                multicast: f.multicast.unwrap_or(true),
            })
            .unwrap_or_default();
        Some(Self {
            target,
            mode: migration.mode.unwrap_or_default(),
            features,
        })
    }

    pub fn is_live(&self) -> bool {
        self.mode == MigrationMode::Live
    }

    /// True when translating from SDN objects to OVN-Kubernetes objects
    pub fn to_ovn(&self) -> bool {
        self.target == NetworkType::OvnKubernetes
    }
}

/// Translatable features
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    EgressFirewall,
    EgressIp,
    Multicast,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::EgressFirewall => write!(f, "EgressFirewall"),
            Feature::EgressIp => write!(f, "EgressIP"),
            Feature::Multicast => write!(f, "Multicast"),
        }
    }
}

/// What one feature translation achieved in this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated,
    /// Precondition unmet; nothing was written
    WaitingForNodeReadiness,
}

/// Final state of every feature touched by a pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub features: Vec<(Feature, FeatureState)>,
}

impl MigrationReport {
    pub fn state_of(&self, feature: Feature) -> FeatureState {
        self.features
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, s)| *s)
            .unwrap_or(FeatureState::NotMigrating)
    }

    /// True when no feature is left waiting
    pub fn is_complete(&self) -> bool {
        self.features
            .iter()
            .all(|(_, s)| *s != FeatureState::WaitingForNodeReadiness)
    }
}

/// Translate every enabled feature toward the intent's target type
///
/// The first failing feature aborts the pass; translations already applied
/// stay in place.
#[instrument(skip(store), fields(target = %intent.target))]
pub async fn migrate_network_type(
    store: &dyn ObjectStore,
    intent: &MigrationIntent,
) -> Result<MigrationReport> {
    let machine = FeatureStateMachine::new();
    let mut report = MigrationReport::default();

    let enabled = [
        (Feature::EgressFirewall, intent.features.egress_firewall),
        (Feature::EgressIp, intent.features.egress_ip),
        (Feature::Multicast, intent.features.multicast),
    ];
    for (feature, on) in enabled {
        if !on {
            debug!("{} translation disabled", feature);
            report.features.push((feature, FeatureState::NotMigrating));
            continue;
        }

        let state = machine
            .transition(FeatureState::NotMigrating, FeatureEvent::TranslationStarted)
            .state();
        let outcome = match feature {
            Feature::EgressFirewall => egress_firewall::migrate(store, intent.to_ovn()).await,
            Feature::EgressIp => egress_ip::migrate(store, intent.to_ovn()).await,
            Feature::Multicast => multicast::migrate(store, intent.to_ovn()).await,
        }
        .map_err(|e| Error::MigrationError(format!("{} translation failed: {}", feature, e)))?;

        let event = match outcome {
            TranslationOutcome::Translated => FeatureEvent::TranslationSucceeded,
            TranslationOutcome::WaitingForNodeReadiness => FeatureEvent::PreconditionUnmet,
        };
        let state = machine.transition(state, event).state();
        match state {
            FeatureState::WaitingForNodeReadiness => {
                warn!("{} translation waiting for nodes and namespaces", feature)
            }
            _ => info!("{} translation {}", feature, state),
        }
        report.features.push((feature, state));
    }
    Ok(report)
}

/// Field manager for every write made by the migration code
pub(crate) fn migration_field_manager() -> String {
    field_manager_for(Some(MIGRATION_SUBCONTROLLER))
}

/// Re-read `key`, let `mutate` edit it and write it back, retrying on conflict
///
/// `mutate` returns whether it changed anything; unchanged objects are not
/// written. Returns `false` when the object does not exist.
pub(crate) async fn mutate_with_retry<F>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    mutate: F,
) -> Result<bool>
where
    F: Fn(&mut Document) -> Result<bool> + Send + Sync,
{
    let field_manager = migration_field_manager();
    let fm = field_manager.as_str();
    let mutate = &mutate;
    retry_on_conflict(&RetryBackoff::default(), move || async move {
        let Some(mut obj) = store.get(key).await? else {
            return Ok(false);
        };
        if !mutate(&mut obj)? {
            return Ok(false);
        }
        store.update(&key.cluster, &obj, None, fm).await?;
        Ok(true)
    })
    .await
}
