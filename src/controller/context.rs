use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::OperatorConfig;
use crate::controller::error::BackoffConfig;
use crate::health::HealthState;
use crate::render::{InfraFacts, Renderer};
use crate::store::ObjectStore;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Object store every read and write goes through
    pub store: Arc<dyn ObjectStore>,
    /// Desired-state renderer
    pub renderer: Arc<dyn Renderer>,
    pub config: OperatorConfig,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Requeue backoff after failed passes
    pub backoff: BackoffConfig,
    failures: Arc<AtomicU32>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn Renderer>,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            renderer,
            config,
            health_state,
            backoff: BackoffConfig::default(),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Count a failed pass, returning how many failures preceded it
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reset_failures(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn infra(&self) -> InfraFacts {
        InfraFacts {
            platform_type: self.config.platform_type.clone(),
        }
    }
}
