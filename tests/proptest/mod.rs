// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for field ownership, validation and migration phases
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Field set algebra behaves like set algebra
//! 2. Moving ownership between managers is idempotent and loses no fields
//! 3. Validation accepts every well-formed network and is deterministic
//! 4. The migration state machine never panics and only completes when allowed

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use proptest::prelude::*;

use network_operator::apply::field_manager::{APPLY, UPDATE, entry_field_set, new_entry};
use network_operator::apply::fieldpath::{FieldPath, FieldSet, PathElement};
use network_operator::apply::{UpgradeOptions, upgrade_managed_fields};
use network_operator::controller::validation::{validate_spec, validate_spec_change};
use network_operator::crd::{
    ClusterNetworkEntry, DefaultNetworkDefinition, NetworkSpec, NetworkType,
};
use network_operator::migration::state_machine::{
    MigrationContext, MigrationEvent, MigrationPhase, MigrationStateMachine, TransitionResult,
    determine_event,
};

const BASE: &str = "cluster-network-operator";
const OPERCONFIG: &str = "cluster-network-operator/operconfig";

// =============================================================================
// Strategy generators for field sets
// =============================================================================

fn path_element() -> impl Strategy<Value = PathElement> {
    prop_oneof![
        4 => prop::sample::select(vec!["spec", "data", "status", "a", "b", "ports"])
            .prop_map(|name| PathElement::Field(name.to_string())),
        1 => (0u64..3).prop_map(PathElement::Index),
        1 => prop::sample::select(vec![r#"{"name":"x"}"#, r#"{"port":80,"protocol":"TCP"}"#])
            .prop_map(|key| PathElement::Key(key.to_string())),
    ]
}

fn field_path() -> impl Strategy<Value = FieldPath> {
    prop::collection::vec(path_element(), 1..4)
}

fn field_paths() -> impl Strategy<Value = Vec<FieldPath>> {
    prop::collection::vec(field_path(), 0..8)
}

fn field_set(paths: &[FieldPath]) -> FieldSet {
    let mut set = FieldSet::new();
    for path in paths {
        set.insert(path);
    }
    set
}

fn manager() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![BASE, OPERCONFIG, "kubectl"])
}

fn operation() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![APPLY, UPDATE])
}

fn api_version() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["v1", "v1beta1"])
}

/// At most one record per manager and operation, as the API server keeps them
fn managed_entries() -> impl Strategy<Value = Vec<ManagedFieldsEntry>> {
    prop::collection::vec((manager(), operation(), api_version(), field_paths()), 0..5).prop_map(
        |records| {
            let mut seen = Vec::new();
            records
                .into_iter()
                .filter(|(manager, operation, _, _)| {
                    let fresh = !seen.contains(&(*manager, *operation));
                    seen.push((*manager, *operation));
                    fresh
                })
                .map(|(manager, operation, version, paths)| {
                    new_entry(manager, operation, version, "", &field_set(&paths))
                })
                .collect()
        },
    )
}

fn record<'a>(
    entries: &'a [ManagedFieldsEntry],
    manager: &str,
    operation: &str,
) -> Option<&'a ManagedFieldsEntry> {
    entries
        .iter()
        .find(|e| {
            e.manager.as_deref() == Some(manager) && e.operation.as_deref() == Some(operation)
        })
}

fn owned(entries: &[ManagedFieldsEntry], manager: &str, operation: &str) -> FieldSet {
    entries
        .iter()
        .filter(|e| {
            e.manager.as_deref() == Some(manager) && e.operation.as_deref() == Some(operation)
        })
        .map(|e| entry_field_set(e).unwrap())
        .fold(FieldSet::new(), |acc, set| acc.union(&set))
}

// =============================================================================
// Strategy generators for network specs
// =============================================================================

fn network_type() -> impl Strategy<Value = NetworkType> {
    prop_oneof![Just(NetworkType::OpenShiftSdn), Just(NetworkType::OvnKubernetes)]
}

fn cluster_network_entry() -> impl Strategy<Value = ClusterNetworkEntry> {
    (1u8..=254, 8u32..=22).prop_flat_map(|(octet, prefix)| {
        (prefix..=30).prop_map(move |host_prefix| ClusterNetworkEntry {
            cidr: format!("10.{}.0.0/{}", octet, prefix),
            host_prefix: Some(host_prefix),
        })
    })
}

fn valid_spec() -> impl Strategy<Value = NetworkSpec> {
    (
        prop::collection::vec(cluster_network_entry(), 1..3),
        (16u8..=31, 12u32..=24),
        network_type(),
        any::<bool>(),
    )
        .prop_map(|(cluster_network, (octet, prefix), type_, diagnostics)| NetworkSpec {
            cluster_network,
            service_network: vec![format!("172.{}.0.0/{}", octet, prefix)],
            default_network: DefaultNetworkDefinition { type_ },
            migration: None,
            disable_network_diagnostics: diagnostics,
        })
}

// =============================================================================
// Strategy generators for migration facts
// =============================================================================

fn migration_context() -> impl Strategy<Value = MigrationContext> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(
                live_intent,
                target_differs,
                mtu_ready,
                target_cni_available,
                target_cni_in_use,
                original_cni_purged,
            )| MigrationContext {
                live_intent,
                target_differs,
                mtu_ready,
                target_cni_available,
                target_cni_in_use,
                original_cni_purged,
            },
        )
}

fn migration_phase() -> impl Strategy<Value = MigrationPhase> {
    prop_oneof![
        Just(MigrationPhase::NotStarted),
        Just(MigrationPhase::InProgress),
        Just(MigrationPhase::Completed),
    ]
}

fn migration_event() -> impl Strategy<Value = MigrationEvent> {
    prop_oneof![
        Just(MigrationEvent::MigrationRequested),
        Just(MigrationEvent::ConditionsProgressed),
        Just(MigrationEvent::AllConditionsMet),
        Just(MigrationEvent::MigrationCancelled),
        Just(MigrationEvent::Idle),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Union contains both operands and does not depend on order
    #[test]
    fn prop_field_set_union(a in field_paths(), b in field_paths()) {
        let (left, right) = (field_set(&a), field_set(&b));
        let union = left.union(&right);

        prop_assert_eq!(&union, &right.union(&left));
        prop_assert_eq!(&union.union(&union), &union);
        for path in a.iter().chain(&b) {
            prop_assert!(union.contains(path), "missing {:?}", path);
        }
    }

    /// Difference keeps exactly the paths the other set lacks
    #[test]
    fn prop_field_set_difference(a in field_paths(), b in field_paths()) {
        let (left, right) = (field_set(&a), field_set(&b));
        let diff = left.difference(&right);

        for path in &a {
            prop_assert_eq!(diff.contains(path), !right.contains(path));
        }
        for path in &b {
            prop_assert!(!diff.contains(path));
        }
        prop_assert!(left.difference(&left).is_empty());
    }

    /// Moving ownership twice is the same as moving it once
    #[test]
    fn prop_upgrade_is_idempotent(entries in managed_entries()) {
        let opts = UpgradeOptions::default();
        let once = upgrade_managed_fields(&entries, &[BASE], OPERCONFIG, &opts).unwrap();
        let twice = upgrade_managed_fields(&once, &[BASE], OPERCONFIG, &opts).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// The subcontroller's record ends up as the union of its own fields and
    /// the base manager's same-version updates
    #[test]
    fn prop_upgrade_loses_no_fields(entries in managed_entries()) {
        let applied = record(&entries, OPERCONFIG, APPLY);
        let updated = record(&entries, BASE, UPDATE);
        let expected = match (applied, updated) {
            (Some(a), Some(u)) if a.api_version == u.api_version => {
                entry_field_set(a).unwrap().union(&entry_field_set(u).unwrap())
            }
            // an update under another apiVersion is dropped
            (Some(a), _) => entry_field_set(a).unwrap(),
            (None, Some(u)) => entry_field_set(u).unwrap(),
            (None, None) => FieldSet::new(),
        };

        let upgraded = upgrade_managed_fields(
            &entries,
            &[BASE],
            OPERCONFIG,
            &UpgradeOptions::default(),
        )
        .unwrap();

        prop_assert!(owned(&upgraded, BASE, UPDATE).is_empty());
        prop_assert_eq!(owned(&upgraded, OPERCONFIG, APPLY), expected);
    }

    /// Well-formed networks always pass validation, deterministically
    #[test]
    fn prop_valid_spec_passes_validation(spec in valid_spec()) {
        prop_assert!(validate_spec(&spec).is_ok());
        let diff = validate_spec_change(&spec, &spec).unwrap();
        prop_assert!(!diff.has_changes());
    }

    /// A host prefix shorter than its network is always rejected
    #[test]
    fn prop_oversized_host_prefix_rejected(spec in valid_spec(), shrink in 1u32..8) {
        let mut spec = spec;
        let prefix: u32 = spec.cluster_network[0]
            .cidr
            .rsplit('/')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        spec.cluster_network[0].host_prefix = Some(prefix - shrink.min(prefix));
        prop_assert!(validate_spec(&spec).is_err());
    }

    /// Changing the service network is never allowed
    #[test]
    fn prop_service_network_is_immutable(spec in valid_spec(), octet in 0u8..16) {
        let mut changed = spec.clone();
        changed.service_network = vec![format!("192.168.{}.0/24", octet)];
        prop_assert!(validate_spec_change(&spec, &changed).is_err());
    }

    /// Any phase and event combination returns a result without panicking
    #[test]
    fn prop_state_machine_no_panic(
        phase in migration_phase(),
        event in migration_event(),
        ctx in migration_context(),
    ) {
        let sm = MigrationStateMachine::new();
        let result = sm.transition(phase, event, &ctx);
        if event == MigrationEvent::Idle {
            let is_invalid = matches!(result, TransitionResult::InvalidTransition { .. });
            prop_assert!(is_invalid);
        }
    }

    /// Completion is only reached when every migration condition holds
    #[test]
    fn prop_completion_requires_all_conditions(
        steps in prop::collection::vec(migration_context(), 1..12),
    ) {
        let sm = MigrationStateMachine::new();
        let mut phase = MigrationPhase::NotStarted;
        for ctx in &steps {
            let event = determine_event(phase, ctx);
            let next = sm.transition(phase, event, ctx).state();
            if next == MigrationPhase::Completed && phase != MigrationPhase::Completed {
                prop_assert!(ctx.all_conditions_met());
            }
            phase = next;
        }
    }
}
