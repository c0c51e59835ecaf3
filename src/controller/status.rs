//! Status and conditions management for the operator configuration
//!
//! This module provides utilities for managing Kubernetes-style conditions
//! and writing the status subresource of the operator `Network`.

use chrono::Utc;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{Condition, Network, NetworkStatus};
use crate::names::FIELD_MANAGER;
use crate::store::{ObjectKey, ObjectStore, kinds};

/// Operator condition types following Kubernetes conventions
pub mod condition_types {
    /// All rendered objects are applied
    pub const AVAILABLE: &str = "Available";
    /// The operator is rolling out a change
    pub const PROGRESSING: &str = "Progressing";
    /// The last pass failed
    pub const DEGRADED: &str = "Degraded";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    ///
    /// The transition time only moves when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    fn flag(value: bool) -> &'static str {
        if value {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        }
    }

    /// Set the Available condition
    pub fn available(self, is_available: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::AVAILABLE,
            Self::flag(is_available),
            reason,
            message,
        )
    }

    /// Set the Progressing condition
    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            Self::flag(is_progressing),
            reason,
            message,
        )
    }

    /// Set the Degraded condition
    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::DEGRADED,
            Self::flag(is_degraded),
            reason,
            message,
        )
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Whether `conditions` has `type_` set to True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == condition_status::TRUE)
}

/// Status manager for the operator `Network`
pub struct StatusManager<'a> {
    network: &'a Network,
    store: &'a dyn ObjectStore,
}

impl<'a> StatusManager<'a> {
    pub fn new(network: &'a Network, store: &'a dyn ObjectStore) -> Self {
        Self { network, store }
    }

    fn builder(&self) -> ConditionBuilder {
        let existing = self
            .network
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        ConditionBuilder::from_existing(existing, self.network.metadata.generation)
    }

    /// Whether the stored status says a rollout is in flight
    pub fn is_progressing(&self) -> bool {
        self.network
            .status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, condition_types::PROGRESSING))
    }

    /// Write the status subresource, skipping the write when nothing but
    /// timestamps would change
    pub async fn update(&self, status: NetworkStatus) -> Result<()> {
        if let Some(current) = &self.network.status
            && current.observed_generation == status.observed_generation
            && same_conditions(&current.conditions, &status.conditions)
        {
            return Ok(());
        }

        let key = ObjectKey::local(kinds::operator_network(), None, &self.network.name_any());
        let patch = serde_json::json!({ "status": status });
        self.store
            .merge_patch(&key, &patch, Some("status"), FIELD_MANAGER)
            .await?;
        Ok(())
    }

    /// Everything applied and settled
    pub async fn set_available(&self) -> Result<()> {
        let conditions = self
            .builder()
            .available(true, "AsExpected", "All network objects are applied")
            .progressing(false, "AsExpected", "Network configuration is settled")
            .degraded(false, "AsExpected", "")
            .build();
        self.update(self.status_with(conditions)).await
    }

    /// A rollout or migration is still in flight
    pub async fn set_progressing(&self, reason: &str, message: &str) -> Result<()> {
        let conditions = self
            .builder()
            .available(true, "AsExpected", "All network objects are applied")
            .progressing(true, reason, message)
            .degraded(false, "AsExpected", "")
            .build();
        self.update(self.status_with(conditions)).await
    }

    /// The last pass failed
    pub async fn set_degraded(&self, reason: &str, message: &str) -> Result<()> {
        let conditions = self
            .builder()
            .progressing(false, reason, message)
            .degraded(true, reason, message)
            .build();
        self.update(self.status_with(conditions)).await
    }

    fn status_with(&self, conditions: Vec<Condition>) -> NetworkStatus {
        NetworkStatus {
            observed_generation: self.network.metadata.generation,
            conditions,
        }
    }
}

fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.type_ == y.type_
                && x.status == y.status
                && x.reason == y.reason
                && x.message == y.message
        })
}
