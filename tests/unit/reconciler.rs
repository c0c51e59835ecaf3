//! Reconcile passes over the operator configuration

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use serde_json::json;

use network_operator::config::OperatorConfig;
use network_operator::controller::status::condition_types;
use network_operator::controller::status::is_condition_true;
use network_operator::controller::{
    Context, Error, PassOutcome, applied_snapshot, error_policy, reconcile, reconcile_network,
};
use network_operator::crd::{Condition, NetworkMigration, NetworkSpec, NetworkType};
use network_operator::document::Document;
use network_operator::health::{HealthState, ReconcileLabels};
use network_operator::names::IGNORE_ERRORS_ANNOTATION;
use network_operator::store::{MemoryStore, ObjectKey, ObjectStore, kinds};

use crate::common::*;

fn context(store: &Arc<MemoryStore>, objects: Vec<Document>) -> Context {
    Context::new(
        store.clone(),
        Arc::new(StaticRenderer { objects }),
        OperatorConfig::default(),
        None,
    )
}

fn widget(ignore_errors: bool) -> Document {
    let mut obj = doc(json!({
        "apiVersion": "example.com/v1",
        "kind": "Widget",
        "metadata": {"name": "w", "namespace": "openshift-network-operator"}
    }));
    if ignore_errors {
        obj.set_annotation(IGNORE_ERRORS_ANNOTATION, "").unwrap();
    }
    obj
}

fn operator_key() -> ObjectKey {
    ObjectKey::local(kinds::operator_network(), None, "cluster")
}

async fn stored_operator_conditions(store: &MemoryStore) -> Vec<Condition> {
    let stored = store.get(&operator_key()).await.unwrap().unwrap();
    stored
        .get(&["status", "conditions"])
        .map(|value| serde_json::from_value(value.clone()).unwrap())
        .unwrap_or_default()
}

/// Store holding the operator configuration for `spec`
fn seeded_store(spec: NetworkSpec) -> (Arc<MemoryStore>, network_operator::Network) {
    let store = Arc::new(MemoryStore::new());
    let network = operator_network(spec);
    store.insert(operator_network_document(&network)).unwrap();
    (store, network)
}

mod passes {
    use super::*;

    #[tokio::test]
    async fn test_pass_applies_rendered_objects() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));
        let rendered = vec![
            applied_snapshot("cluster", &network.spec).unwrap(),
            config_map(
                "openshift-ovn-kubernetes",
                "ovnkube-config",
                json!({"mtu": "1400"}),
            ),
        ];
        let ctx = context(&store, rendered);

        let outcome = reconcile_network(&network, &ctx).await.unwrap();
        assert_eq!(outcome, PassOutcome::Settled);

        let key = ObjectKey::local(
            kinds::config_map(),
            Some("openshift-ovn-kubernetes"),
            "ovnkube-config",
        );
        let cm = store.get(&key).await.unwrap().unwrap();
        assert_eq!(
            managers_of(&cm)[0].0,
            "cluster-network-operator/operconfig"
        );
        let snapshot = network_operator::controller::load_applied_spec(store.as_ref(), "cluster")
            .await
            .unwrap();
        assert_eq!(snapshot, Some(network.spec.clone()));
    }

    #[tokio::test]
    async fn test_defaults_are_written_back() {
        let (store, network) = seeded_store(NetworkSpec::default());
        let ctx = context(&store, vec![]);

        reconcile_network(&network, &ctx).await.unwrap();

        let stored = store.get(&operator_key()).await.unwrap().unwrap();
        let service_network = stored.get_string_slice(&["spec", "serviceNetwork"]).unwrap();
        assert_eq!(service_network, Some(vec!["172.30.0.0/16".to_string()]));
        let cluster_network = stored.get_slice(&["spec", "clusterNetwork"]).unwrap().unwrap();
        assert_eq!(cluster_network[0]["cidr"], "10.128.0.0/14");
        assert_eq!(cluster_network[0]["hostPrefix"], 23);
    }

    #[tokio::test]
    async fn test_ignore_errors_annotation_downgrades_failure() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));

        let ctx = context(&store, vec![widget(true)]);
        assert_eq!(
            reconcile_network(&network, &ctx).await.unwrap(),
            PassOutcome::Settled
        );

        let ctx = context(&store, vec![widget(false)]);
        let err = reconcile_network(&network, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::UnknownMapping(_)));
    }

    #[tokio::test]
    async fn test_pending_rollback_is_progressing() {
        let mut spec = network_spec(NetworkType::OpenShiftSdn);
        spec.migration = Some(NetworkMigration {
            network_type: Some(NetworkType::OpenShiftSdn),
            ..Default::default()
        });
        let (store, network) = seeded_store(spec);
        store.insert(namespace("team-a")).unwrap();
        let ctx = context(&store, vec![]);

        let outcome = reconcile_network(&network, &ctx).await.unwrap();
        assert!(matches!(
            outcome,
            PassOutcome::Progressing { ref reason, .. } if reason == "MigratingNetworkType"
        ));

        store.insert(net_namespace("team-a", &[])).unwrap();
        assert_eq!(
            reconcile_network(&network, &ctx).await.unwrap(),
            PassOutcome::Settled
        );
    }
}

mod spec_changes {
    use super::*;

    #[tokio::test]
    async fn test_service_network_is_immutable() {
        let applied = network_spec(NetworkType::OvnKubernetes);
        let mut requested = applied.clone();
        requested.service_network = vec!["172.31.0.0/16".to_string()];

        let (store, network) = seeded_store(requested);
        store.insert(applied_snapshot("cluster", &applied).unwrap()).unwrap();
        let ctx = context(&store, vec![]);

        let err = reconcile_network(&network, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_type_change_needs_migration_intent() {
        let applied = network_spec(NetworkType::OpenShiftSdn);
        let requested = network_spec(NetworkType::OvnKubernetes);

        let (store, network) = seeded_store(requested);
        store.insert(applied_snapshot("cluster", &applied).unwrap()).unwrap();
        let ctx = context(&store, vec![]);

        let err = reconcile_network(&network, &ctx).await.unwrap_err();
        assert_eq!(err.reason(), "InvalidOperatorConfig");
    }
}

mod reconcile_entrypoint {
    use super::*;

    #[tokio::test]
    async fn test_success_sets_available_and_requeues() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));
        let ctx = Arc::new(context(&store, vec![]));

        let action = reconcile(Arc::new(network), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.reconcile_interval));

        let conditions = stored_operator_conditions(&store).await;
        assert!(is_condition_true(&conditions, condition_types::AVAILABLE));
        assert!(!is_condition_true(&conditions, condition_types::DEGRADED));
        assert!(!is_condition_true(&conditions, condition_types::PROGRESSING));
    }

    #[tokio::test]
    async fn test_failure_marks_degraded() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));
        let ctx = Arc::new(context(&store, vec![widget(false)]));

        assert!(reconcile(Arc::new(network), ctx).await.is_err());

        let conditions = stored_operator_conditions(&store).await;
        assert!(is_condition_true(&conditions, condition_types::DEGRADED));
        let degraded = conditions
            .iter()
            .find(|c| c.type_ == condition_types::DEGRADED)
            .unwrap();
        assert_eq!(degraded.reason, "ReconcileFailed");
    }

    #[tokio::test]
    async fn test_other_configurations_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(context(&store, vec![widget(false)]));
        let mut network = operator_network(network_spec(NetworkType::OvnKubernetes));
        network.metadata.name = Some("secondary".to_string());

        let action = reconcile(Arc::new(network), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(store.last_resource_version().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metrics_are_recorded() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));
        let health = Arc::new(HealthState::new());
        let ctx = Arc::new(Context::new(
            store.clone(),
            Arc::new(StaticRenderer { objects: vec![] }),
            OperatorConfig::default(),
            Some(health.clone()),
        ));

        reconcile(Arc::new(network), ctx).await.unwrap();

        let labels = ReconcileLabels {
            name: "cluster".to_string(),
        };
        assert_eq!(
            health.metrics.reconciliations_total.get_or_create(&labels).get(),
            1
        );
        assert_eq!(
            health
                .metrics
                .reconciliation_errors_total
                .get_or_create(&labels)
                .get(),
            0
        );
    }

    #[tokio::test]
    async fn test_error_policy_backs_off_until_success() {
        let (store, network) = seeded_store(network_spec(NetworkType::OvnKubernetes));
        let mut ctx = context(&store, vec![]);
        ctx.backoff.jitter = 0.0;
        let ctx = Arc::new(ctx);
        let network = Arc::new(network);
        let err = Error::TransientError("apiserver unavailable".into());

        let first = error_policy(network.clone(), &err, ctx.clone());
        let second = error_policy(network.clone(), &err, ctx.clone());
        assert_eq!(first, Action::requeue(Duration::from_secs(5)));
        assert_eq!(second, Action::requeue(Duration::from_secs(10)));

        reconcile(network.clone(), ctx.clone()).await.unwrap();
        assert_eq!(
            error_policy(network.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );

        let invalid = Error::ValidationError("bad cidr".into());
        assert_eq!(
            error_policy(network, &invalid, ctx.clone()),
            Action::requeue(ctx.backoff.cap)
        );
    }
}
