//! Validation of requested operator configurations

use network_operator::controller::{validate_spec, validate_spec_change};
use network_operator::crd::{ClusterNetworkEntry, NetworkMigration, NetworkType};

use crate::common::*;

fn dual_stack_entry() -> ClusterNetworkEntry {
    ClusterNetworkEntry {
        cidr: "fd01::/48".to_string(),
        host_prefix: Some(64),
    }
}

mod requested_spec {
    use super::*;

    #[test]
    fn test_ipv6_host_prefix() {
        let mut spec = network_spec(NetworkType::OvnKubernetes);
        spec.cluster_network.push(dual_stack_entry());
        spec.service_network.push("fd02::/112".to_string());
        assert!(validate_spec(&spec).is_ok());

        spec.cluster_network[1].host_prefix = Some(129);
        assert!(validate_spec(&spec).is_err());

        spec.cluster_network[1].host_prefix = Some(32);
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_bad_service_network() {
        let mut spec = network_spec(NetworkType::OvnKubernetes);
        spec.service_network = vec!["172.30.0.0".to_string()];
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_missing_host_prefix_is_accepted() {
        let mut spec = network_spec(NetworkType::OvnKubernetes);
        spec.cluster_network[0].host_prefix = None;
        assert!(validate_spec(&spec).is_ok());
    }
}

mod spec_change {
    use super::*;

    #[test]
    fn test_unchanged_spec_has_no_diff() {
        let spec = network_spec(NetworkType::OvnKubernetes);
        let diff = validate_spec_change(&spec, &spec).unwrap();
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_appending_ipv6_cluster_network() {
        let old = network_spec(NetworkType::OvnKubernetes);
        let mut new = old.clone();
        new.cluster_network.push(dual_stack_entry());

        let diff = validate_spec_change(&old, &new).unwrap();
        assert!(diff.cluster_network_changed);
        assert!(!diff.network_type_changed);
    }

    #[test]
    fn test_reordering_cluster_networks_is_rejected() {
        let mut old = network_spec(NetworkType::OvnKubernetes);
        old.cluster_network.push(dual_stack_entry());
        let mut new = old.clone();
        new.cluster_network.reverse();
        assert!(validate_spec_change(&old, &new).is_err());
    }

    #[test]
    fn test_first_service_network_may_be_set() {
        let mut old = network_spec(NetworkType::OvnKubernetes);
        old.service_network.clear();
        let new = network_spec(NetworkType::OvnKubernetes);
        assert!(validate_spec_change(&old, &new).is_ok());
    }

    #[test]
    fn test_migration_intent_must_match_new_type() {
        let old = network_spec(NetworkType::OvnKubernetes);
        let mut new = network_spec(NetworkType::OpenShiftSdn);
        new.migration = Some(NetworkMigration {
            network_type: Some(NetworkType::OvnKubernetes),
            ..Default::default()
        });
        assert!(validate_spec_change(&old, &new).is_err());

        new.migration = Some(NetworkMigration {
            network_type: Some(NetworkType::OpenShiftSdn),
            ..Default::default()
        });
        assert!(validate_spec_change(&old, &new).unwrap().network_type_changed);
    }

    #[test]
    fn test_diagnostics_toggle_is_reported() {
        let old = network_spec(NetworkType::OvnKubernetes);
        let mut new = old.clone();
        new.disable_network_diagnostics = !old.disable_network_diagnostics;
        let diff = validate_spec_change(&old, &new).unwrap();
        assert!(diff.diagnostics_changed);
        assert!(diff.has_changes());
    }
}
