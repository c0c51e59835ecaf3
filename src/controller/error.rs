//! Error types for the network operator
//!
//! Not-found and conflict are classified explicitly because large parts of
//! the apply and migration code treat them as states rather than failures.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::document::DocumentError;

/// Error variants are named with the `Error` suffix where they wrap a lower layer.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Manifest parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Document error: {0}")]
    DocumentError(#[from] DocumentError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported object {object}: {reason}")]
    UnsupportedObject { object: String, reason: String },

    #[error("Unknown cluster name {0:?}")]
    UnknownCluster(String),

    #[error("No REST mapping for {0}; the namespace or custom resource definition may not exist yet")]
    UnknownMapping(String),

    #[error("Managed fields error: {0}")]
    FieldSetError(String),

    #[error("Failed to merge {object}: {source}")]
    MergeFailed {
        object: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to apply {object}: {source}")]
    ApplyFailed {
        object: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Network migration error: {0}")]
    MigrationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Permanent error (will not retry): {0}")]
    PermanentError(String),
}

impl Error {
    /// True when the error means "the object (or its mapping) does not exist"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            Error::ApplyFailed { source, .. } | Error::MergeFailed { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// True for optimistic-concurrency failures (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 409,
            Error::ApplyFailed { source, .. } | Error::MergeFailed { source, .. } => {
                source.is_conflict()
            }
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors other than 404, 409 and 429 are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 404 || code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::ApplyFailed { source, .. } | Error::MergeFailed { source, .. } => {
                source.is_retryable()
            }
            Error::TransientError(_) => true,
            Error::NotFound(_) => true,
            Error::Conflict(_) => true,
            // A missing namespace or CRD usually appears on a later pass
            Error::UnknownMapping(_) => true,
            Error::MigrationError(_) => true,
            Error::PermanentError(_) => false,
            Error::InvalidConfig(_) => false,
            Error::ValidationError(_) => false,
            Error::UnsupportedObject { .. } => false,
            Error::UnknownCluster(_) => false,
            Error::SerializationError(_) => false,
            Error::YamlError(_) => false,
            Error::DocumentError(_) => false,
            Error::FieldSetError(_) => false,
        }
    }

    /// Short machine-readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ApplyFailed { .. } | Error::MergeFailed { .. } => "ApplyOperatorConfig",
            Error::MigrationError(_) => "NetworkTypeMigrationFailed",
            Error::ValidationError(_) | Error::InvalidConfig(_) => "InvalidOperatorConfig",
            Error::UnsupportedObject { .. } => "UnsupportedObject",
            _ => "ReconcileFailed",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Requeue delays after failed passes
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure; doubles with each further one
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay added or removed at random
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay after `failures` earlier consecutive failures
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let doubled = self.base.saturating_mul(1u32 << failures.min(16));
        let delay = doubled.min(self.cap).as_secs_f64();
        let spread = delay * self.jitter;
        let jittered = delay + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64(jittered.clamp(0.0, self.cap.as_secs_f64()))
    }

    /// Errors that cannot heal on their own wait the full cap
    pub fn delay_for_error(&self, error: &Error, failures: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(failures)
        } else {
            self.cap
        }
    }
}
