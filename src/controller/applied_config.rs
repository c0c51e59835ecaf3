//! Snapshot of the last applied operator configuration
//!
//! Kept in the ConfigMap `applied-<name>` in the operator namespace so the
//! next pass can validate a spec change against what is actually running.

use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::NetworkSpec;
use crate::document::Document;
use crate::names::{APPLIED_KEY, APPLIED_PREFIX, OPERATOR_NAMESPACE};
use crate::store::{ObjectKey, ObjectStore, kinds};

pub fn applied_config_name(name: &str) -> String {
    format!("{}{}", APPLIED_PREFIX, name)
}

pub fn applied_config_key(name: &str) -> ObjectKey {
    ObjectKey::local(
        kinds::config_map(),
        Some(OPERATOR_NAMESPACE),
        &applied_config_name(name),
    )
}

/// ConfigMap recording `spec` as applied for the configuration `name`
pub fn applied_snapshot(name: &str, spec: &NetworkSpec) -> Result<Document> {
    let mut doc = Document::named(
        "v1",
        "ConfigMap",
        Some(OPERATOR_NAMESPACE),
        &applied_config_name(name),
    );
    let serialized = serde_json::to_string(spec)?;
    doc.set_string(&["data", APPLIED_KEY], &serialized)?;
    Ok(doc)
}

/// The spec applied by a previous pass; `None` before the first one
pub async fn load_applied_spec(store: &dyn ObjectStore, name: &str) -> Result<Option<NetworkSpec>> {
    let key = applied_config_key(name);
    let Some(doc) = store.get(&key).await? else {
        debug!("no applied configuration recorded for {}", name);
        return Ok(None);
    };
    let Some(serialized) = doc.get_string(&["data", APPLIED_KEY])? else {
        return Ok(None);
    };
    serde_json::from_str(&serialized).map(Some).map_err(|e| {
        Error::InvalidConfig(format!("applied configuration {} is corrupt: {}", key, e))
    })
}
