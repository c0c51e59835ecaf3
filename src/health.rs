//! Probe and metrics endpoints
//!
//! `/healthz` answers as long as the process runs, `/readyz` once the
//! controller has started, and `/metrics` serves the Prometheus registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

use crate::migration::ConditionSink;

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Operator configuration a reconcile metric belongs to
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())
    }
}

/// Live-migration condition a gauge value belongs to
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ConditionLabels {
    pub condition: String,
}

impl EncodeLabelSet for ConditionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("condition", self.condition.as_str()).encode(encoder.encode_label())
    }
}

pub struct Metrics {
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// 1 True, 0 False, -1 Unknown
    pub live_migration_condition: Family<ConditionLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut root = Registry::default();
        let registry = root.sub_registry_with_prefix("network_operator");

        let reconciliations_total = Family::default();
        registry.register(
            "reconciliations",
            "Completed passes over the operator configuration",
            reconciliations_total.clone(),
        );
        let reconciliation_errors_total = Family::default();
        registry.register(
            "reconciliation_errors",
            "Passes over the operator configuration that failed",
            reconciliation_errors_total.clone(),
        );
        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 14))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Time spent in one pass over the operator configuration",
            reconcile_duration_seconds.clone(),
        );

        // Exported under the name dashboards already query
        let live_migration_condition = Family::default();
        root.register(
            "openshift_network_operator_live_migration_condition",
            "Network type live migration conditions (1 True, 0 False, -1 Unknown)",
            live_migration_condition.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            live_migration_condition,
            registry: root,
        }
    }

    fn labels(name: &str) -> ReconcileLabels {
        ReconcileLabels {
            name: name.to_string(),
        }
    }

    pub fn record_reconcile(&self, name: &str, duration_secs: f64) {
        let labels = Self::labels(name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&Self::labels(name))
            .inc();
    }

    /// Render the registry in the text exposition format
    fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

impl ConditionSink for Metrics {
    /// Replaces every previously exported value
    fn export_live_migration_conditions(&self, values: &[(&str, i64)]) {
        self.live_migration_condition.clear();
        for (condition, value) in values {
            let labels = ConditionLabels {
                condition: condition.to_string(),
            };
            self.live_migration_condition.get_or_create(&labels).set(*value);
        }
    }
}

/// State shared between the controller and the probe server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controller not started")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe endpoints on all interfaces until the listener fails
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Health server listening on 0.0.0.0:{}", port);
    axum::serve(listener, create_router(state)).await
}
