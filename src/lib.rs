pub mod apply;
pub mod config;
pub mod controller;
pub mod crd;
pub mod document;
pub mod health;
pub mod migration;
pub mod names;
pub mod render;
pub mod store;

pub use apply::{apply_object, delete_object, update_object};
pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, Result, error_policy, reconcile};
pub use crd::Network;
pub use document::Document;
pub use health::{HealthState, Metrics};
pub use migration::{MigrationIntent, migrate_network_type};
pub use store::{KubeStore, MemoryStore, ObjectKey, ObjectStore};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::runtime::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

use crate::names::{OPERATOR_CONFIG_NAME, OVN_NAMESPACE, SDN_NAMESPACE};
use crate::render::ManifestRenderer;

/// Run the operator controller.
///
/// Watches the cluster-scoped operator `Network` and reconciles it. Changes
/// to the plugin DaemonSets requeue the configuration so readiness and
/// live-migration conditions follow the rollout.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    tracing::info!(
        "Starting controller for Network resources (manifests: {})",
        config.manifest_dir.display()
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true);
    }

    let store = Arc::new(KubeStore::new(client.clone()));
    let renderer = Arc::new(ManifestRenderer::new(config.manifest_dir.clone()));
    let ctx = Arc::new(Context::new(store, renderer, config, health_state));

    let networks: Api<Network> = Api::all(client.clone());
    let daemonsets: Api<DaemonSet> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(networks, watcher_config.clone())
        .watches(daemonsets, watcher_config, |ds: DaemonSet| {
            let plugin_owned = ds
                .metadata
                .namespace
                .as_deref()
                .is_some_and(|ns| ns == OVN_NAMESPACE || ns == SDN_NAMESPACE);
            plugin_owned.then(|| ObjectRef::new(OPERATOR_CONFIG_NAME))
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // The Network may be gone by the time a DaemonSet event maps to it
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
