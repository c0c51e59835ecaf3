//! Reconciliation logic for the operator `Network`
//!
//! One pass validates the requested configuration, renders and applies the
//! desired objects, runs any requested network-type migration and
//! publishes the resulting conditions.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::apply_object;
use crate::controller::applied_config::load_applied_spec;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::StatusManager;
use crate::controller::validation::{validate_spec, validate_spec_change};
use crate::crd::{Network, NetworkSpec};
use crate::document::Document;
use crate::migration::{
    ConditionSink, MigrationIntent, MigrationPhase, migrate_network_type,
    refresh_live_migration_conditions,
};
use crate::names::{IGNORE_ERRORS_ANNOTATION, OPERATOR_CONFIG_NAME, OPERCONFIG_SUBCONTROLLER};
use crate::render::RenderInput;
use crate::store::kinds;

/// Reason reported when a pass panics
pub const INTERNAL_ERROR_REASON: &str = "InternalError";

/// Discards live-migration conditions when no metrics are wired up
struct DiscardConditions;

impl ConditionSink for DiscardConditions {
    fn export_live_migration_conditions(&self, _values: &[(&str, i64)]) {}
}

/// What a successful pass leaves behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Everything is applied and no migration is waiting
    Settled,
    /// Something is still rolling out
    Progressing { reason: String, message: String },
}

/// Main reconciliation function
#[instrument(skip(network, ctx), fields(name = %network.name_any()))]
pub async fn reconcile(network: Arc<Network>, ctx: Arc<Context>) -> Result<Action> {
    let name = network.name_any();
    if name != OPERATOR_CONFIG_NAME {
        debug!(
            "ignoring Network {}; only {} is managed",
            name,
            OPERATOR_CONFIG_NAME
        );
        return Ok(Action::await_change());
    }

    info!("Reconciling Network");
    let start = Instant::now();
    let (result, panicked) = match AssertUnwindSafe(reconcile_network(&network, &ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => (result, false),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Reconcile panicked: {}", message);
            (
                Err(Error::PermanentError(format!("reconcile panicked: {}", message))),
                true,
            )
        }
    };

    let status_manager = StatusManager::new(&network, ctx.store.as_ref());
    let status_result = match &result {
        Ok(PassOutcome::Settled) => status_manager.set_available().await,
        Ok(PassOutcome::Progressing { reason, message }) => {
            status_manager.set_progressing(reason, message).await
        }
        Err(e) => {
            let reason = if panicked { INTERNAL_ERROR_REASON } else { e.reason() };
            status_manager.set_degraded(reason, &e.to_string()).await
        }
    };
    if let Err(e) = status_result {
        warn!("Failed to update Network status: {}", e);
    }

    if let Some(ref health) = ctx.health_state {
        match &result {
            Ok(_) => health
                .metrics
                .record_reconcile(&name, start.elapsed().as_secs_f64()),
            Err(_) => health.metrics.record_error(&name),
        }
    }

    match result {
        Ok(_) => {
            ctx.reset_failures();
            info!("Reconciliation completed successfully");
            Ok(Action::requeue(ctx.config.reconcile_interval))
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            Err(e)
        }
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(network: Arc<Network>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.delay_for_error(error, ctx.record_failure());
    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            network.name_any(),
            error,
            delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            network.name_any(),
            error,
            delay
        );
    }
    Action::requeue(delay)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One full pass over the operator configuration
pub async fn reconcile_network(network: &Network, ctx: &Context) -> Result<PassOutcome> {
    let store = ctx.store.as_ref();
    let name = network.name_any();

    let mut spec = network.spec.clone();
    validate_spec(&spec)?;
    if let Some(applied) = load_applied_spec(store, &name).await? {
        let diff = validate_spec_change(&applied, &spec)?;
        if diff.has_changes() {
            info!("Network spec changed: {:?}", diff);
        }
    }

    if spec.fill_defaults() {
        info!("Filling defaults into Network {}", name);
        write_defaults(ctx, &name, &spec).await?;
    }

    let infra = ctx.infra();
    let input = RenderInput {
        spec: &spec,
        infra: &infra,
        feature_gates: &ctx.config.feature_gates,
    };
    let objects = ctx.renderer.render(&input).await?;
    apply_rendered(ctx, &objects).await?;

    let intent = MigrationIntent::from_spec(&spec);
    let mut outcome = PassOutcome::Settled;
    if let Some(intent) = &intent {
        let report = migrate_network_type(store, intent).await?;
        if !report.is_complete() {
            outcome = PassOutcome::Progressing {
                reason: "MigratingNetworkType".to_string(),
                message: format!("waiting to translate configuration for {}", intent.target),
            };
        }
    }

    let status_manager = StatusManager::new(network, store);
    if status_manager.is_progressing() {
        debug!("Operator is progressing, leaving live migration conditions alone");
    } else {
        let sink: &dyn ConditionSink = match &ctx.health_state {
            Some(health) => &health.metrics,
            None => &DiscardConditions,
        };
        let phase = refresh_live_migration_conditions(store, intent.as_ref(), sink).await?;
        if phase == MigrationPhase::InProgress {
            debug!("Live migration in progress");
        }
    }

    Ok(outcome)
}

/// Apply rendered objects in order; the first hard failure stops the pass
async fn apply_rendered(ctx: &Context, objects: &[Document]) -> Result<()> {
    let status_subresource = vec!["status".to_string()];
    for obj in objects {
        let subresources: &[String] =
            if obj.gvk().is_ok_and(|gvk| gvk == kinds::cluster_network()) {
                &status_subresource
            } else {
                &[]
            };
        match apply_object(
            ctx.store.as_ref(),
            obj,
            Some(OPERCONFIG_SUBCONTROLLER),
            subresources,
        )
        .await
        {
            Ok(()) => {}
            Err(e) if obj.annotation(IGNORE_ERRORS_ANNOTATION).is_some() => {
                warn!("Ignoring apply failure of {}: {}", obj.description(), e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn write_defaults(ctx: &Context, name: &str, spec: &NetworkSpec) -> Result<()> {
    let mut doc = Document::named("operator.openshift.io/v1", "Network", None, name);
    doc.set(&["spec"], serde_json::to_value(spec)?)?;
    apply_object(
        ctx.store.as_ref(),
        &doc,
        Some(OPERCONFIG_SUBCONTROLLER),
        &[],
    )
    .await
}
