//! Validation logic for operator configuration changes
//!
//! This module provides validation for the `Network` spec, including:
//! - CIDR syntax and host prefixes
//! - Immutable service network
//! - Network type changes, which must go through a migration

use std::net::IpAddr;

use crate::controller::error::{Error, Result};
use crate::crd::NetworkSpec;

/// Parse `addr/prefix`
pub fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8)> {
    let invalid = || Error::ValidationError(format!("invalid CIDR {:?}", cidr));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

/// Validate the spec on its own
pub fn validate_spec(spec: &NetworkSpec) -> Result<()> {
    for entry in &spec.cluster_network {
        let (addr, prefix) = parse_cidr(&entry.cidr)?;
        if let Some(host_prefix) = entry.host_prefix {
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if host_prefix < u32::from(prefix) || host_prefix > max {
                return Err(Error::ValidationError(format!(
                    "hostPrefix {} does not fit in cluster network {}",
                    host_prefix, entry.cidr
                )));
            }
        }
    }
    for cidr in &spec.service_network {
        parse_cidr(cidr)?;
    }
    Ok(())
}

/// Result of comparing the applied and the requested spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecDiff {
    /// The default network type changed
    pub network_type_changed: bool,
    /// Cluster network entries were added
    pub cluster_network_changed: bool,
    /// The migration intent changed
    pub migration_changed: bool,
    /// The diagnostics toggle changed
    pub diagnostics_changed: bool,
}

impl SpecDiff {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.network_type_changed
            || self.cluster_network_changed
            || self.migration_changed
            || self.diagnostics_changed
    }
}

/// Validate a change from the applied spec `old` to the requested `new`
pub fn validate_spec_change(old: &NetworkSpec, new: &NetworkSpec) -> Result<SpecDiff> {
    if !old.service_network.is_empty() && old.service_network != new.service_network {
        return Err(Error::ValidationError(
            "serviceNetwork cannot be changed after installation".to_string(),
        ));
    }

    // Existing cluster networks stay; new ones may be appended
    if new.cluster_network.len() < old.cluster_network.len()
        || old
            .cluster_network
            .iter()
            .zip(&new.cluster_network)
            .any(|(a, b)| a != b)
    {
        return Err(Error::ValidationError(
            "existing clusterNetwork entries cannot be changed or removed".to_string(),
        ));
    }

    let old_type = old.default_network.type_;
    let new_type = new.default_network.type_;
    let network_type_changed = old_type != new_type;
    if network_type_changed {
        let migrating_to = new.migration.as_ref().and_then(|m| m.network_type);
        if migrating_to != Some(new_type) {
            return Err(Error::ValidationError(format!(
                "network type cannot change from {} to {} without spec.migration.networkType set to {}",
                old_type, new_type, new_type
            )));
        }
    }

    Ok(SpecDiff {
        network_type_changed,
        cluster_network_changed: new.cluster_network.len() != old.cluster_network.len(),
        migration_changed: old.migration != new.migration,
        diagnostics_changed: old.disable_network_diagnostics != new.disable_network_diagnostics,
    })
}
