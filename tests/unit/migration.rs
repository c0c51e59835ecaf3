//! Feature translation driven through `migrate_network_type`

use serde_json::json;

use network_operator::crd::NetworkType;
use network_operator::migration::{
    Feature, FeatureState, FeatureToggles, MigrationIntent, migrate_network_type, multicast,
};
use network_operator::names::{OVN_MULTICAST_ANNOTATION, SDN_MULTICAST_ANNOTATION};
use network_operator::store::{MemoryStore, ObjectKey, ObjectStore, kinds};

use crate::common::*;

fn egress_network_policy(namespace: &str) -> network_operator::Document {
    doc(json!({
        "apiVersion": "network.openshift.io/v1",
        "kind": "EgressNetworkPolicy",
        "metadata": {"name": "default-rules", "namespace": namespace},
        "spec": {"egress": [
            {"type": "Allow", "to": {"dnsName": "example.com"}},
            {"type": "Deny", "to": {"cidrSelector": "0.0.0.0/0"}}
        ]}
    }))
}

/// SDN cluster with one namespace using every translatable feature
fn sdn_cluster() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(namespace("team-a")).unwrap();
    let mut netns = net_namespace("team-a", &["10.0.128.5"]);
    netns.set_annotation(SDN_MULTICAST_ANNOTATION, "true").unwrap();
    store.insert(netns).unwrap();
    store.insert(egress_network_policy("team-a")).unwrap();
    store
}

#[tokio::test]
async fn test_offline_migration_to_ovn_translates_everything() {
    let store = sdn_cluster();
    let intent = MigrationIntent::new(NetworkType::OvnKubernetes);

    let report = migrate_network_type(&store, &intent).await.unwrap();
    assert!(report.is_complete());
    for feature in [Feature::EgressFirewall, Feature::EgressIp, Feature::Multicast] {
        assert_eq!(report.state_of(feature), FeatureState::Translated);
    }

    let firewall_key = ObjectKey::local(kinds::egress_firewall(), Some("team-a"), "default");
    let firewall = store.get(&firewall_key).await.unwrap().unwrap();
    assert_eq!(
        firewall.get(&["spec"]),
        egress_network_policy("team-a").get(&["spec"])
    );

    let ns = store
        .get(&ObjectKey::local(kinds::namespace(), None, "team-a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ns.annotation(OVN_MULTICAST_ANNOTATION), Some("true"));

    let egress_ip = ObjectKey::local(kinds::egress_ip(), None, "egressip-team-a");
    assert!(store.get(&egress_ip).await.unwrap().is_some());
}

#[tokio::test]
async fn test_disabled_features_are_not_touched() {
    let store = sdn_cluster();
    let intent = MigrationIntent {
        features: FeatureToggles {
            egress_ip: false,
            egress_firewall: false,
            multicast: true,
        },
        ..MigrationIntent::new(NetworkType::OvnKubernetes)
    };

    let report = migrate_network_type(&store, &intent).await.unwrap();
    assert_eq!(
        report.state_of(Feature::EgressIp),
        FeatureState::NotMigrating
    );
    assert_eq!(
        report.state_of(Feature::EgressFirewall),
        FeatureState::NotMigrating
    );
    assert_eq!(
        report.state_of(Feature::Multicast),
        FeatureState::Translated
    );

    let egress_ip = ObjectKey::local(kinds::egress_ip(), None, "egressip-team-a");
    assert!(store.get(&egress_ip).await.unwrap().is_none());
    let firewall_key = ObjectKey::local(kinds::egress_firewall(), Some("team-a"), "default");
    assert!(store.get(&firewall_key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rollback_waits_until_sdn_objects_exist() {
    let store = MemoryStore::new();
    store.insert(namespace("team-a")).unwrap();
    store.insert(namespace("team-b")).unwrap();
    store.insert(net_namespace("team-a", &[])).unwrap();
    let intent = MigrationIntent::new(NetworkType::OpenShiftSdn);

    let report = migrate_network_type(&store, &intent).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(
        report.state_of(Feature::Multicast),
        FeatureState::WaitingForNodeReadiness
    );
    assert_eq!(
        report.state_of(Feature::EgressIp),
        FeatureState::WaitingForNodeReadiness
    );
    assert_eq!(
        report.state_of(Feature::EgressFirewall),
        FeatureState::Translated
    );

    store.insert(net_namespace("team-b", &[])).unwrap();
    let report = migrate_network_type(&store, &intent).await.unwrap();
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_multicast_rollback_copies_namespace_flag() {
    let store = MemoryStore::new();
    let mut ns = namespace("streaming");
    ns.set_annotation(OVN_MULTICAST_ANNOTATION, "true").unwrap();
    store.insert(ns).unwrap();
    store.insert(net_namespace("streaming", &[])).unwrap();

    multicast::migrate(&store, false).await.unwrap();

    let netns = store
        .get(&ObjectKey::local(kinds::net_namespace(), None, "streaming"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(netns.annotation(SDN_MULTICAST_ANNOTATION), Some("true"));
}

#[tokio::test]
async fn test_firewall_rollback_keeps_name_and_namespace() {
    let store = MemoryStore::new();
    store
        .insert(doc(json!({
            "apiVersion": "k8s.ovn.org/v1",
            "kind": "EgressFirewall",
            "metadata": {"name": "default", "namespace": "team-a"},
            "spec": {"egress": [
                {"type": "Allow", "to": {"cidrSelector": "10.0.0.0/8"},
                 "ports": [{"protocol": "TCP", "port": 443}]}
            ]}
        })))
        .unwrap();

    let report = migrate_network_type(&store, &MigrationIntent::new(NetworkType::OpenShiftSdn))
        .await
        .unwrap();
    assert_eq!(
        report.state_of(Feature::EgressFirewall),
        FeatureState::Translated
    );

    let key = ObjectKey::local(kinds::egress_network_policy(), Some("team-a"), "default");
    let policy = store.get(&key).await.unwrap().unwrap();
    let rules = policy.get_slice(&["spec", "egress"]).unwrap().unwrap();
    assert_eq!(rules.len(), 1);
    assert!(rules[0].get("ports").is_none());
}
