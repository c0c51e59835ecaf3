//! EgressNetworkPolicy <-> EgressFirewall translation

use serde_json::Value;
use tracing::{debug, info, warn};

use super::TranslationOutcome;
use crate::apply::apply_object;
use crate::controller::error::Result;
use crate::document::{Document, api_version_of};
use crate::names::{DEFAULT_CLUSTER_NAME, EGRESS_FIREWALL_NAME, MIGRATION_SUBCONTROLLER};
use crate::store::{ObjectStore, kinds};

pub async fn migrate(store: &dyn ObjectStore, to_ovn: bool) -> Result<TranslationOutcome> {
    if to_ovn {
        to_egress_firewalls(store).await
    } else {
        to_egress_network_policies(store).await
    }
}

async fn to_egress_firewalls(store: &dyn ObjectStore) -> Result<TranslationOutcome> {
    let policies = store
        .list(
            DEFAULT_CLUSTER_NAME,
            &kinds::egress_network_policy(),
            None,
            None,
        )
        .await?;
    for policy in &policies {
        let Some(namespace) = policy.namespace() else {
            continue;
        };
        let mut firewall = Document::named(
            &api_version_of(&kinds::egress_firewall()),
            "EgressFirewall",
            Some(namespace),
            EGRESS_FIREWALL_NAME,
        );
        if let Some(spec) = policy.get(&["spec"]) {
            firewall.set(&["spec"], spec.clone())?;
        }
        debug!(
            "translating {} to {}",
            policy.description(),
            firewall.description()
        );
        apply_object(store, &firewall, Some(MIGRATION_SUBCONTROLLER), &[]).await?;
    }
    info!("translated {} EgressNetworkPolicies", policies.len());
    Ok(TranslationOutcome::Translated)
}

async fn to_egress_network_policies(store: &dyn ObjectStore) -> Result<TranslationOutcome> {
    let firewalls = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::egress_firewall(), None, None)
        .await?;
    for firewall in &firewalls {
        let Some(namespace) = firewall.namespace() else {
            continue;
        };
        let mut policy = Document::named(
            &api_version_of(&kinds::egress_network_policy()),
            "EgressNetworkPolicy",
            Some(namespace),
            firewall.name(),
        );
        if let Some(spec) = firewall.get(&["spec"]) {
            let mut spec = spec.clone();
            if strip_ports(&mut spec) {
                warn!(
                    "{} has port-restricted rules; EgressNetworkPolicy has no ports so they now apply to all ports",
                    firewall.description()
                );
            }
            policy.set(&["spec"], spec)?;
        }
        debug!(
            "translating {} to {}",
            firewall.description(),
            policy.description()
        );
        apply_object(store, &policy, Some(MIGRATION_SUBCONTROLLER), &[]).await?;
    }
    info!("translated {} EgressFirewalls", firewalls.len());
    Ok(TranslationOutcome::Translated)
}

/// Remove `ports` from every egress rule; returns whether any were present
fn strip_ports(spec: &mut Value) -> bool {
    let Some(rules) = spec.get_mut("egress").and_then(Value::as_array_mut) else {
        return false;
    };
    let mut stripped = false;
    for rule in rules.iter_mut() {
        if let Some(rule) = rule.as_object_mut() {
            stripped |= rule.remove("ports").is_some();
        }
    }
    stripped
}
