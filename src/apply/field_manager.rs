//! Field-manager ownership migration
//!
//! Moves field ownership recorded in `metadata.managedFields` from one
//! field manager to another without losing coverage. The common case is a
//! client-side writer (`Update` records) becoming a server-side-apply
//! writer (`Apply` record), or a coarse manager name being split into
//! per-subcontroller names.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::fieldpath::FieldSet;
use crate::controller::error::{Error, Result};
use crate::document::Document;
use crate::store::{ObjectKey, ObjectStore};

/// Operation recorded for server-side apply writes
pub const APPLY: &str = "Apply";

/// Operation recorded for create, update and patch writes
pub const UPDATE: &str = "Update";

const FIELDS_V1: &str = "FieldsV1";

/// Options for [`upgrade_managed_fields`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Subresource whose records are migrated; empty means the root object
    pub subresource: String,
}

impl UpgradeOptions {
    pub fn for_subresource(subresource: &str) -> Self {
        Self {
            subresource: subresource.to_string(),
        }
    }
}

/// Subresource of a record, with the root as `""`
pub fn subresource_of(entry: &ManagedFieldsEntry) -> &str {
    entry.subresource.as_deref().unwrap_or("")
}

/// Decode the field set carried by a record
pub fn entry_field_set(entry: &ManagedFieldsEntry) -> Result<FieldSet> {
    match &entry.fields_v1 {
        Some(fields) => FieldSet::from_fields_v1(&fields.0).map_err(|e| {
            Error::FieldSetError(format!(
                "record of manager {:?}: {}",
                entry.manager.as_deref().unwrap_or(""),
                e
            ))
        }),
        None => Ok(FieldSet::new()),
    }
}

fn set_entry_field_set(entry: &mut ManagedFieldsEntry, set: &FieldSet) {
    entry.fields_type = Some(FIELDS_V1.to_string());
    entry.fields_v1 = Some(FieldsV1(set.to_fields_v1()));
}

/// Build a new ownership record
pub fn new_entry(
    manager: &str,
    operation: &str,
    api_version: &str,
    subresource: &str,
    fields: &FieldSet,
) -> ManagedFieldsEntry {
    let mut entry = ManagedFieldsEntry {
        api_version: Some(api_version.to_string()),
        manager: Some(manager.to_string()),
        operation: Some(operation.to_string()),
        subresource: (!subresource.is_empty()).then(|| subresource.to_string()),
        ..Default::default()
    };
    set_entry_field_set(&mut entry, fields);
    entry
}

fn matches(entry: &ManagedFieldsEntry, manager: &str, operation: &str, subresource: &str) -> bool {
    entry.manager.as_deref() == Some(manager)
        && entry.operation.as_deref() == Some(operation)
        && subresource_of(entry) == subresource
}

/// Rewrite ownership so that the `Update` records of every manager in
/// `csa_managers` become part of the `Apply` record of `ssa_manager`.
///
/// Records are assumed to be sorted most recent first. The input is never
/// modified; when nothing matches the returned list equals the input.
///
/// Only `Update` records with the same apiVersion as the target `Apply`
/// record are unioned. Records under other apiVersions are dropped along
/// with the rest of the source manager's root records.
pub fn upgrade_managed_fields(
    entries: &[ManagedFieldsEntry],
    csa_managers: &[&str],
    ssa_manager: &str,
    opts: &UpgradeOptions,
) -> Result<Vec<ManagedFieldsEntry>> {
    let mut upgraded = entries.to_vec();
    for csa_manager in csa_managers {
        upgraded = upgrade_one(upgraded, csa_manager, ssa_manager, opts)?;
    }
    Ok(upgraded)
}

fn upgrade_one(
    mut entries: Vec<ManagedFieldsEntry>,
    csa_manager: &str,
    ssa_manager: &str,
    opts: &UpgradeOptions,
) -> Result<Vec<ManagedFieldsEntry>> {
    let sub = opts.subresource.as_str();

    let Some(source) = entries
        .iter()
        .position(|e| matches(e, csa_manager, UPDATE, sub))
    else {
        return Ok(entries);
    };

    let target = match entries
        .iter()
        .position(|e| matches(e, ssa_manager, APPLY, sub))
    {
        Some(index) => index,
        None => {
            entries[source].operation = Some(APPLY.to_string());
            entries[source].manager = Some(ssa_manager.to_string());
            source
        }
    };

    let target_version = entries[target].api_version.clone();
    let mut combined = entry_field_set(&entries[target])?;
    if let Some(update) = entries
        .iter()
        .find(|e| matches(e, csa_manager, UPDATE, sub) && e.api_version == target_version)
    {
        combined = combined.union(&entry_field_set(update)?);
    }
    set_entry_field_set(&mut entries[target], &combined);

    entries.retain(|e| !matches(e, csa_manager, UPDATE, sub));
    Ok(entries)
}

/// Fold the `Apply` records of `deprecated` into the `Apply` record of
/// `target` at the given subresource.
pub fn consolidate_apply_manager(
    entries: &[ManagedFieldsEntry],
    deprecated: &str,
    target: &str,
    subresource: &str,
) -> Result<Vec<ManagedFieldsEntry>> {
    let mut entries = entries.to_vec();
    let Some(first_deprecated) = entries
        .iter()
        .position(|e| matches(e, deprecated, APPLY, subresource))
    else {
        return Ok(entries);
    };

    let target_index = match entries
        .iter()
        .position(|e| matches(e, target, APPLY, subresource))
    {
        Some(index) => index,
        None => {
            entries[first_deprecated].manager = Some(target.to_string());
            first_deprecated
        }
    };

    let mut combined = entry_field_set(&entries[target_index])?;
    for entry in entries
        .iter()
        .filter(|e| matches(e, deprecated, APPLY, subresource))
    {
        combined = combined.union(&entry_field_set(entry)?);
    }
    set_entry_field_set(&mut entries[target_index], &combined);

    entries.retain(|e| !matches(e, deprecated, APPLY, subresource));
    Ok(entries)
}

/// JSON patch replacing `managedFields` with the upgraded list, or `None`
/// when the object is already upgraded.
///
/// The second operation rewrites `resourceVersion` to the value read, so
/// the server rejects the patch with a conflict if the object changed in
/// the meantime.
pub fn upgrade_managed_fields_patch(
    doc: &Document,
    csa_managers: &[&str],
    ssa_manager: &str,
    opts: &UpgradeOptions,
) -> Result<Option<Value>> {
    let current = doc.managed_fields()?;
    let upgraded = upgrade_managed_fields(&current, csa_managers, ssa_manager, opts)?;
    if upgraded == current {
        return Ok(None);
    }
    Ok(Some(managed_fields_patch(doc, &upgraded)?))
}

/// Upgrade the records of `doc` in place; returns whether anything changed
pub fn upgrade_managed_fields_in_place(
    doc: &mut Document,
    csa_managers: &[&str],
    ssa_manager: &str,
    opts: &UpgradeOptions,
) -> Result<bool> {
    let current = doc.managed_fields()?;
    let upgraded = upgrade_managed_fields(&current, csa_managers, ssa_manager, opts)?;
    if upgraded == current {
        return Ok(false);
    }
    doc.set_managed_fields(&upgraded)?;
    Ok(true)
}

fn managed_fields_patch(doc: &Document, entries: &[ManagedFieldsEntry]) -> Result<Value> {
    Ok(json!([
        {
            "op": "replace",
            "path": "/metadata/managedFields",
            "value": serde_json::to_value(entries)?,
        },
        {
            "op": "replace",
            "path": "/metadata/resourceVersion",
            "value": doc.resource_version().unwrap_or(""),
        }
    ]))
}

/// Remove every trace of `deprecated` from the live object's ownership.
///
/// Each record held by `deprecated` is first replayed under `replacement`:
/// `Update` records as an unchanged update of the live object, `Apply`
/// records as an empty server-side apply (skipped when `replacement`
/// already holds an `Apply` record there). With `strip` set, the
/// deprecated records are then unioned into `replacement` and removed
/// with a resourceVersion-guarded JSON patch.
///
/// Returns whether the object was modified.
pub async fn drop_deprecated_manager(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    deprecated: &str,
    replacement: &str,
    strip: bool,
) -> Result<bool> {
    let Some(mut live) = store.get(key).await? else {
        return Ok(false);
    };
    let entries = live.managed_fields()?;
    let stale: Vec<&ManagedFieldsEntry> = entries
        .iter()
        .filter(|e| e.manager.as_deref() == Some(deprecated))
        .collect();
    if stale.is_empty() {
        return Ok(false);
    }

    info!(
        "Moving {} ownership record(s) of {} on {} to {}",
        stale.len(),
        deprecated,
        key,
        replacement
    );

    let mut subresources: Vec<String> = Vec::new();
    for entry in &stale {
        let sub = subresource_of(entry).to_string();
        match entry.operation.as_deref() {
            Some(UPDATE) => {
                let sub_arg = (!sub.is_empty()).then_some(sub.as_str());
                live = store
                    .update(&key.cluster, &live, sub_arg, replacement)
                    .await?;
            }
            Some(APPLY) => {
                let already_applied = entries.iter().any(|e| matches(e, replacement, APPLY, &sub));
                if !already_applied {
                    let empty = Document::named(
                        live.api_version(),
                        live.kind(),
                        live.namespace(),
                        live.name(),
                    );
                    let subs: Vec<String> = if sub.is_empty() { vec![] } else { vec![sub.clone()] };
                    live = store.apply(key, &empty, replacement, false, &subs).await?;
                }
            }
            other => debug!("Ignoring record with operation {:?}", other),
        }
        if !subresources.contains(&sub) {
            subresources.push(sub);
        }
    }

    if !strip {
        return Ok(true);
    }

    let Some(live) = store.get(key).await? else {
        return Ok(true);
    };
    let current = live.managed_fields()?;
    let mut upgraded = current.clone();
    for sub in &subresources {
        upgraded = upgrade_managed_fields(
            &upgraded,
            &[deprecated],
            replacement,
            &UpgradeOptions::for_subresource(sub),
        )?;
        upgraded = consolidate_apply_manager(&upgraded, deprecated, replacement, sub)?;
    }
    if upgraded != current {
        let patch = managed_fields_patch(&live, &upgraded)?;
        store.json_patch(key, &patch, replacement).await?;
        debug!("Stripped {} from managed fields of {}", deprecated, key);
    }
    Ok(true)
}
