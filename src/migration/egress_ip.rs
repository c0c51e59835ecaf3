//! Egress IP translation
//!
//! OpenShift SDN configures egress IPs on HostSubnets (per node) and
//! NetNamespaces (per namespace). OVN-Kubernetes uses EgressIP objects
//! selecting namespaces plus an `egress-assignable` label on nodes.
//!
//! A HostSubnet with egress CIDRs is "automatic": OpenShift SDN picks
//! addresses from the CIDRs. One with only egress IPs is "manual". The
//! forward direction preserves the automatic configuration on the Node in
//! recovery annotations; the manual configuration can only be approximated
//! on the way back, from the cloud egress-ipconfig annotation.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{TranslationOutcome, mutate_with_retry};
use crate::apply::apply_object;
use crate::controller::error::{Error, Result};
use crate::document::{Document, api_version_of};
use crate::names::{
    DEFAULT_CLUSTER_NAME, EGRESS_ASSIGNABLE_LABEL, EGRESS_CIDRS_RECOVERY_ANNOTATION,
    EGRESS_IP_PREFIX, EGRESS_IPCONFIG_ANNOTATION, EGRESS_IPS_RECOVERY_ANNOTATION,
    MIGRATION_SUBCONTROLLER, NAMESPACE_NAME_LABEL,
};
use crate::store::{ObjectKey, ObjectStore, kinds};

const EGRESS_IPS: &str = "egressIPs";
const EGRESS_CIDRS: &str = "egressCIDRs";

pub async fn migrate(store: &dyn ObjectStore, to_ovn: bool) -> Result<TranslationOutcome> {
    if to_ovn {
        migrate_host_subnets(store).await?;
        migrate_net_namespaces(store).await?;
        Ok(TranslationOutcome::Translated)
    } else {
        if !sdn_objects_ready(store).await? {
            info!("waiting for every node and namespace to get its SDN object");
            return Ok(TranslationOutcome::WaitingForNodeReadiness);
        }
        restore_net_namespaces(store).await?;
        restore_host_subnets(store).await?;
        Ok(TranslationOutcome::Translated)
    }
}

/// CloudPrivateIPConfig objects are named after the IP; colons are not
/// valid in names so IPv6 addresses use dots instead
pub fn cloud_private_ip_config_name(ip: &str) -> String {
    ip.replace(':', ".")
}

fn string_list(obj: &Document, field: &str) -> Result<Vec<String>> {
    Ok(obj.get_string_slice(&[field])?.unwrap_or_default())
}

fn split_annotation(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn delete_cloud_private_ip_configs(store: &dyn ObjectStore, ips: &[String]) -> Result<()> {
    for ip in ips {
        let key = ObjectKey::local(
            kinds::cloud_private_ip_config(),
            None,
            &cloud_private_ip_config_name(ip),
        );
        if store.delete(&key).await? {
            debug!("deleted CloudPrivateIPConfig for {}", ip);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SDN -> OVN-Kubernetes
// ---------------------------------------------------------------------------

async fn migrate_host_subnets(store: &dyn ObjectStore) -> Result<()> {
    let subnets = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::host_subnet(), None, None)
        .await?;
    for subnet in &subnets {
        let ips = string_list(subnet, EGRESS_IPS)?;
        let cidrs = string_list(subnet, EGRESS_CIDRS)?;
        if ips.is_empty() && cidrs.is_empty() {
            continue;
        }
        let node = subnet
            .get_string(&["host"])?
            .unwrap_or_else(|| subnet.name().to_string());
        let automatic = !cidrs.is_empty();

        let node_key = ObjectKey::local(kinds::node(), None, &node);
        let labelled = mutate_with_retry(store, &node_key, |obj| {
            let mut changed = obj.label(EGRESS_ASSIGNABLE_LABEL) != Some("");
            obj.set_label(EGRESS_ASSIGNABLE_LABEL, "")?;
            if automatic {
                let joined_cidrs = cidrs.join(",");
                changed |=
                    obj.annotation(EGRESS_CIDRS_RECOVERY_ANNOTATION) != Some(joined_cidrs.as_str());
                obj.set_annotation(EGRESS_CIDRS_RECOVERY_ANNOTATION, &joined_cidrs)?;
                if !ips.is_empty() {
                    let joined_ips = ips.join(",");
                    changed |=
                        obj.annotation(EGRESS_IPS_RECOVERY_ANNOTATION) != Some(joined_ips.as_str());
                    obj.set_annotation(EGRESS_IPS_RECOVERY_ANNOTATION, &joined_ips)?;
                }
            }
            Ok(changed)
        })
        .await?;
        if !labelled && store.get(&node_key).await?.is_none() {
            warn!(
                "node {} of HostSubnet {} not found, keeping its egress configuration",
                node,
                subnet.name()
            );
            continue;
        }

        let subnet_key = ObjectKey::for_document(subnet)?;
        mutate_with_retry(store, &subnet_key, |obj| {
            let removed_ips = obj.remove(&[EGRESS_IPS]).is_some();
            let removed_cidrs = obj.remove(&[EGRESS_CIDRS]).is_some();
            Ok(removed_ips || removed_cidrs)
        })
        .await?;
        info!(
            "node {} marked egress-assignable ({} configuration)",
            node,
            if automatic { "automatic" } else { "manual" }
        );
    }
    Ok(())
}

async fn migrate_net_namespaces(store: &dyn ObjectStore) -> Result<()> {
    let net_namespaces = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::net_namespace(), None, None)
        .await?;

    // Build everything before writing so a malformed object stops the pass
    // before any source data is cleared.
    let mut egress_ips = Vec::new();
    let mut sources = Vec::new();
    for netns in &net_namespaces {
        let ips = string_list(netns, EGRESS_IPS)?;
        if ips.is_empty() {
            continue;
        }
        let namespace = netns
            .get_string(&["netname"])?
            .unwrap_or_else(|| netns.name().to_string());
        delete_cloud_private_ip_configs(store, &ips).await?;
        egress_ips.push(build_egress_ip(&namespace, &ips)?);
        sources.push(ObjectKey::for_document(netns)?);
    }

    for egress_ip in &egress_ips {
        apply_object(store, egress_ip, Some(MIGRATION_SUBCONTROLLER), &[]).await?;
    }
    for key in &sources {
        mutate_with_retry(store, key, |obj| Ok(obj.remove(&[EGRESS_IPS]).is_some()))
            .await?;
    }
    info!("translated egress IPs of {} namespaces", sources.len());
    Ok(())
}

/// EgressIP object carrying a namespace's egress IPs
pub fn build_egress_ip(namespace: &str, ips: &[String]) -> Result<Document> {
    let mut obj = Document::named(
        &api_version_of(&kinds::egress_ip()),
        "EgressIP",
        None,
        &format!("{}{}", EGRESS_IP_PREFIX, namespace),
    );
    obj.set(
        &["spec"],
        json!({
            "egressIPs": ips,
            "namespaceSelector": {"matchLabels": {NAMESPACE_NAME_LABEL: namespace}},
        }),
    )?;
    Ok(obj)
}

// ---------------------------------------------------------------------------
// OVN-Kubernetes -> SDN
// ---------------------------------------------------------------------------

async fn sdn_objects_ready(store: &dyn ObjectStore) -> Result<bool> {
    let pairs = [
        (kinds::node(), kinds::host_subnet()),
        (kinds::namespace(), kinds::net_namespace()),
    ];
    for (owner, sdn) in pairs {
        let owners = store.list(DEFAULT_CLUSTER_NAME, &owner, None, None).await?;
        let sdn_objects = store.list(DEFAULT_CLUSTER_NAME, &sdn, None, None).await?;
        let known: BTreeSet<&str> = sdn_objects.iter().map(Document::name).collect();
        if let Some(missing) = owners.iter().find(|o| !known.contains(o.name())) {
            debug!("{} {} has no {} yet", owner.kind, missing.name(), sdn.kind);
            return Ok(false);
        }
    }
    Ok(true)
}

async fn restore_net_namespaces(store: &dyn ObjectStore) -> Result<()> {
    let egress_ips = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::egress_ip(), None, None)
        .await?;
    for egress_ip in &egress_ips {
        let ips = egress_ip
            .get_string_slice(&["spec", "egressIPs"])?
            .unwrap_or_default();
        let Some(namespace) = egress_ip
            .get_string(&["spec", "namespaceSelector", "matchLabels", NAMESPACE_NAME_LABEL])?
        else {
            warn!(
                "{} does not select a single namespace by name, skipping",
                egress_ip.description()
            );
            continue;
        };
        delete_cloud_private_ip_configs(store, &ips).await?;

        let key = ObjectKey::local(kinds::net_namespace(), None, &namespace);
        let restored = mutate_with_retry(store, &key, |obj| {
            if string_list(obj, EGRESS_IPS)? == ips {
                return Ok(false);
            }
            obj.set_string_slice(&[EGRESS_IPS], &ips)?;
            Ok(true)
        })
        .await?;
        if restored {
            info!("restored egress IPs of NetNamespace {}", namespace);
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct EgressIpConfig {
    #[serde(default)]
    ifaddr: IfAddr,
}

#[derive(Deserialize, Default)]
struct IfAddr {
    #[serde(default)]
    ipv4: Option<String>,
    #[serde(default)]
    ipv6: Option<String>,
}

/// Best-effort egress CIDR from the cloud egress-ipconfig annotation
///
/// Only the first interface is considered, and the whole interface subnet
/// is returned rather than the original per-node range.
pub fn cidr_from_ipconfig(annotation: &str) -> Result<Option<String>> {
    let configs: Vec<EgressIpConfig> = serde_json::from_str(annotation).map_err(|e| {
        Error::MigrationError(format!("invalid {} annotation: {}", EGRESS_IPCONFIG_ANNOTATION, e))
    })?;
    Ok(configs
        .into_iter()
        .next()
        .and_then(|c| c.ifaddr.ipv4.or(c.ifaddr.ipv6)))
}

async fn restore_host_subnets(store: &dyn ObjectStore) -> Result<()> {
    let nodes = store
        .list(
            DEFAULT_CLUSTER_NAME,
            &kinds::node(),
            None,
            Some(EGRESS_ASSIGNABLE_LABEL),
        )
        .await?;
    for node in &nodes {
        let mut cidrs = split_annotation(node.annotation(EGRESS_CIDRS_RECOVERY_ANNOTATION));
        if cidrs.is_empty()
            && let Some(ipconfig) = node.annotation(EGRESS_IPCONFIG_ANNOTATION)
            && let Some(cidr) = cidr_from_ipconfig(ipconfig)?
        {
            warn!(
                "node {} has no recorded egress CIDRs, using interface subnet {}",
                node.name(),
                cidr
            );
            cidrs.push(cidr);
        }
        let ips = split_annotation(node.annotation(EGRESS_IPS_RECOVERY_ANNOTATION));

        let subnet_key = ObjectKey::local(kinds::host_subnet(), None, node.name());
        mutate_with_retry(store, &subnet_key, |obj| {
            let mut changed = false;
            for (field, values) in [(EGRESS_CIDRS, &cidrs), (EGRESS_IPS, &ips)] {
                if !values.is_empty() && string_list(obj, field)? != *values {
                    obj.set(&[field], Value::from(values.clone()))?;
                    changed = true;
                }
            }
            Ok(changed)
        })
        .await?;

        let node_key = ObjectKey::for_document(node)?;
        mutate_with_retry(store, &node_key, |obj| {
            let mut changed = obj.remove_label(EGRESS_ASSIGNABLE_LABEL).is_some();
            changed |= obj.remove_annotation(EGRESS_CIDRS_RECOVERY_ANNOTATION).is_some();
            changed |= obj.remove_annotation(EGRESS_IPS_RECOVERY_ANNOTATION).is_some();
            Ok(changed)
        })
        .await?;
        info!(
            "restored egress configuration of HostSubnet {}",
            node.name()
        );
    }
    Ok(())
}
