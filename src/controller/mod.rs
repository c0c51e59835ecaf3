pub mod applied_config;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod retry;
pub mod status;
pub mod validation;

pub use applied_config::{applied_config_key, applied_snapshot, load_applied_spec};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{
    INTERNAL_ERROR_REASON, PassOutcome, error_policy, reconcile, reconcile_network,
};
pub use retry::{RetryBackoff, retry_on_conflict};
pub use status::{ConditionBuilder, StatusManager};
pub use validation::{SpecDiff, validate_spec, validate_spec_change};
