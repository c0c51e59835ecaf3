//! In-process object store
//!
//! Behaves like a small API server: objects get a `resourceVersion` that
//! increases on every write, updates and guarded JSON patches fail with a
//! conflict when the version is stale, and every write records managed
//! fields for the writing field manager.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use kube::api::GroupVersionKind;
use kube::discovery::ApiResource;
use serde_json::{Map, Value};
use tracing::trace;

use super::{ObjectKey, ObjectStore, ResourceMapping, kinds};
use crate::apply::field_manager::{APPLY, UPDATE, entry_field_set, new_entry, subresource_of};
use crate::apply::fieldpath::{FieldPath, FieldSet, PathElement};
use crate::controller::error::{Error, Result};
use crate::document::Document;
use crate::names::DEFAULT_CLUSTER_NAME;

type StoreKey = (String, String, String, String, String);

#[derive(Clone, Debug)]
struct KindInfo {
    version: String,
    namespaced: bool,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, Document>,
    kinds: BTreeMap<(String, String), KindInfo>,
    clusters: BTreeSet<String>,
    last_version: u64,
    check_namespaces: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn kind(&self, gvk: &GroupVersionKind) -> Result<&KindInfo> {
        self.kinds
            .get(&(gvk.group.clone(), gvk.kind.clone()))
            .ok_or_else(|| {
                Error::UnknownMapping(format!("{}/{} {}", gvk.group, gvk.version, gvk.kind))
            })
    }

    fn check_cluster(&self, cluster: &str) -> Result<()> {
        if self.clusters.contains(cluster) {
            Ok(())
        } else {
            Err(Error::UnknownCluster(cluster.to_string()))
        }
    }

    fn store_key(&self, key: &ObjectKey) -> Result<StoreKey> {
        self.check_cluster(&key.cluster)?;
        let info = self.kind(&key.gvk)?;
        let namespace = if info.namespaced {
            key.namespace.clone().unwrap_or_default()
        } else {
            String::new()
        };
        Ok((
            key.cluster.clone(),
            key.gvk.group.clone(),
            key.gvk.kind.clone(),
            namespace,
            key.name.clone(),
        ))
    }

    fn ensure_namespace(&self, key: &StoreKey) -> Result<()> {
        let (cluster, _, _, namespace, _) = key;
        if !self.check_namespaces || namespace.is_empty() {
            return Ok(());
        }
        let ns_key = (
            cluster.clone(),
            String::new(),
            "Namespace".to_string(),
            String::new(),
            namespace.clone(),
        );
        if self.objects.contains_key(&ns_key) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("namespaces {:?} not found", namespace)))
        }
    }
}

/// In-memory [`ObjectStore`] with API-server-like write semantics
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store knowing the default cluster and every kind the operator uses
    pub fn new() -> Self {
        let store = Self {
            state: Mutex::new(State::default()),
        };
        if let Ok(mut state) = store.state.lock() {
            state.clusters.insert(DEFAULT_CLUSTER_NAME.to_string());
            for (gvk, namespaced) in [
                (kinds::namespace(), false),
                (kinds::node(), false),
                (kinds::config_map(), true),
                (kinds::service(), true),
                (kinds::service_account(), true),
                (kinds::daemon_set(), true),
                (kinds::deployment(), true),
                (kinds::operator_network(), false),
                (kinds::cluster_network(), false),
                (kinds::host_subnet(), false),
                (kinds::net_namespace(), false),
                (kinds::egress_network_policy(), true),
                (kinds::egress_firewall(), true),
                (kinds::egress_ip(), false),
                (kinds::cloud_private_ip_config(), false),
                (kinds::machine_config_pool(), false),
                (kinds::machine_config(), false),
                (kinds::network_attachment_definition(), true),
            ] {
                state.kinds.insert(
                    (gvk.group.clone(), gvk.kind.clone()),
                    KindInfo {
                        version: gvk.version.clone(),
                        namespaced,
                    },
                );
            }
        }
        store
    }

    /// Reject namespaced writes whose namespace object does not exist
    pub fn with_namespace_checks(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.check_namespaces = true;
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::TransientError("memory store lock poisoned".to_string()))
    }

    /// Make a kind addressable
    pub fn register(&self, gvk: &GroupVersionKind, namespaced: bool) -> Result<()> {
        self.lock()?.kinds.insert(
            (gvk.group.clone(), gvk.kind.clone()),
            KindInfo {
                version: gvk.version.clone(),
                namespaced,
            },
        );
        Ok(())
    }

    /// Forget a kind, as if its CRD were not installed
    pub fn unregister(&self, gvk: &GroupVersionKind) -> Result<()> {
        self.lock()?
            .kinds
            .remove(&(gvk.group.clone(), gvk.kind.clone()));
        Ok(())
    }

    pub fn add_cluster(&self, name: &str) -> Result<()> {
        self.lock()?.clusters.insert(name.to_string());
        Ok(())
    }

    /// Store an object as-is on the default cluster, bypassing field management
    pub fn insert(&self, doc: Document) -> Result<Document> {
        self.insert_into(DEFAULT_CLUSTER_NAME, doc)
    }

    pub fn insert_into(&self, cluster: &str, mut doc: Document) -> Result<Document> {
        let mut state = self.lock()?;
        let key = state.store_key(&ObjectKey::new(
            cluster,
            doc.gvk()?,
            doc.namespace(),
            doc.name(),
        ))?;
        let version = state.next_version();
        doc.set_resource_version(&version);
        state.objects.insert(key, doc.clone());
        Ok(doc)
    }

    /// Every object currently stored on the default cluster
    pub fn objects(&self) -> Result<Vec<Document>> {
        Ok(self
            .lock()?
            .objects
            .iter()
            .filter(|(key, _)| key.0 == DEFAULT_CLUSTER_NAME)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    /// Highest resourceVersion handed out so far
    pub fn last_resource_version(&self) -> Result<u64> {
        Ok(self.lock()?.last_version)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn has_cluster(&self, cluster: &str) -> bool {
        self.lock()
            .map(|state| state.clusters.contains(cluster))
            .unwrap_or(false)
    }

    async fn resolve(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
    ) -> Result<Option<ResourceMapping>> {
        let state = self.lock()?;
        state.check_cluster(cluster)?;
        Ok(state
            .kinds
            .get(&(gvk.group.clone(), gvk.kind.clone()))
            .map(|info| ResourceMapping {
                api_resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
                    &gvk.group,
                    &info.version,
                    &gvk.kind,
                )),
                namespaced: info.namespaced,
            }))
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Document>> {
        let state = self.lock()?;
        let store_key = state.store_key(key)?;
        Ok(state.objects.get(&store_key).cloned())
    }

    async fn list(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Document>> {
        let state = self.lock()?;
        state.check_cluster(cluster)?;
        state.kind(gvk)?;
        let selector = label_selector.map(parse_selector).unwrap_or_default();
        Ok(state
            .objects
            .iter()
            .filter(|((c, group, kind, ns, _), _)| {
                c == cluster
                    && *group == gvk.group
                    && *kind == gvk.kind
                    && namespace.is_none_or(|want| want == ns)
            })
            .map(|(_, doc)| doc)
            .filter(|doc| selector.iter().all(|req| req.matches(doc)))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        cluster: &str,
        obj: &Document,
        field_manager: &str,
    ) -> Result<Document> {
        let mut state = self.lock()?;
        let key = state.store_key(&ObjectKey::new(
            cluster,
            obj.gvk()?,
            obj.namespace(),
            obj.name(),
        ))?;
        if state.objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{} already exists", obj.description())));
        }
        state.ensure_namespace(&key)?;

        let mut created = obj.clone();
        created.remove(&["metadata", "managedFields"]);
        let fields = FieldSet::from_document(created.as_map());
        let entry = new_entry(field_manager, UPDATE, obj.api_version(), "", &fields);
        created.set_managed_fields(&[entry])?;
        let version = state.next_version();
        created.set_resource_version(&version);
        created.set_string(&["metadata", "uid"], &format!("uid-{}", version))?;
        trace!("Created {}", created.description());
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        cluster: &str,
        obj: &Document,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document> {
        let mut state = self.lock()?;
        let key = state.store_key(&ObjectKey::new(
            cluster,
            obj.gvk()?,
            obj.namespace(),
            obj.name(),
        ))?;
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(obj.description()))?;
        check_version(&stored, obj.resource_version())?;

        let subresource = subresource.unwrap_or("");
        let mut updated = match subresource {
            "" => {
                let mut updated = obj.clone();
                match stored.get(&["status"]) {
                    Some(status) => updated.set(&["status"], status.clone())?,
                    None => {
                        updated.remove(&["status"]);
                    }
                }
                updated
            }
            sub => {
                let mut updated = stored.clone();
                let part = obj.get(&[sub]).cloned().unwrap_or(Value::Null);
                updated.set(&[sub], part)?;
                updated
            }
        };
        for field in ["uid", "creationTimestamp"] {
            if let Some(value) = stored.get(&["metadata", field]) {
                updated.set(&["metadata", field], value.clone())?;
            }
        }

        let entries = record_update(
            stored.managed_fields()?,
            field_manager,
            stored.api_version(),
            subresource,
            stored.as_map(),
            updated.as_map(),
        )?;
        finish_write(&mut state, key, updated, &entries)
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        obj: &Document,
        field_manager: &str,
        force: bool,
        subresources: &[String],
    ) -> Result<Document> {
        let mut state = self.lock()?;
        let store_key = state.store_key(key)?;
        let subresource = subresources.join("/");

        let mut incoming = obj.as_map().clone();
        if let Some(Value::Object(metadata)) = incoming.get_mut("metadata") {
            metadata.remove("managedFields");
            metadata.remove("resourceVersion");
        }
        if subresource.is_empty() {
            incoming.remove("status");
        } else {
            incoming.retain(|k, _| {
                k == "apiVersion" || k == "kind" || k == "metadata" || *k == subresource
            });
        }
        let applied = FieldSet::from_document(&incoming);

        let Some(stored) = state.objects.get(&store_key).cloned() else {
            if !subresource.is_empty() {
                return Err(Error::NotFound(obj.description()));
            }
            state.ensure_namespace(&store_key)?;
            let mut created = Document::from_value(Value::Object(incoming))?;
            let entry = new_entry(field_manager, APPLY, obj.api_version(), "", &applied);
            let version = state.next_version();
            created.set_string(&["metadata", "uid"], &format!("uid-{}", version))?;
            created.set_managed_fields(&[entry])?;
            created.set_resource_version(&version);
            state.objects.insert(store_key, created.clone());
            return Ok(created);
        };

        let base = stored.as_map();
        let mut entries = stored.managed_fields()?;
        let mut previous = FieldSet::new();
        let mut others = FieldSet::new();
        for entry in &entries {
            let set = entry_field_set(entry)?;
            if is_entry(entry, field_manager, APPLY, &subresource) {
                previous = set;
            } else {
                others = others.union(&set);
            }
        }

        let changed = changed_fields(&applied, base, &incoming);
        let conflicts: Vec<FieldPath> = changed
            .leaves()
            .into_iter()
            .filter(|path| others.contains(path))
            .collect();
        if !conflicts.is_empty() && !force {
            return Err(Error::Conflict(format!(
                "apply of {} by {} conflicts on {} field(s)",
                obj.description(),
                field_manager,
                conflicts.len()
            )));
        }

        let mut merged = base.clone();
        deep_merge(&mut merged, &incoming);
        for path in previous.difference(&applied).leaves() {
            if !others.contains(&path) {
                remove_at(&mut merged, &path);
            }
        }

        for entry in entries.iter_mut() {
            if !is_entry(entry, field_manager, APPLY, &subresource) {
                let remaining = entry_field_set(entry)?.difference(&changed);
                set_entry_fields(entry, &remaining);
            }
        }
        entries.retain(|entry| !is_entry(entry, field_manager, APPLY, &subresource));
        entries.insert(
            0,
            new_entry(
                field_manager,
                APPLY,
                obj.api_version(),
                &subresource,
                &applied,
            ),
        );

        let updated = Document::from_value(Value::Object(merged))?;
        finish_write(&mut state, store_key, updated, &entries)
    }

    async fn json_patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        field_manager: &str,
    ) -> Result<Document> {
        let mut state = self.lock()?;
        let store_key = state.store_key(key)?;
        let stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let ops = patch
            .as_array()
            .ok_or_else(|| Error::PermanentError("JSON patch must be an array".to_string()))?;
        let mut touches_managed_fields = false;
        for op in ops {
            let path = op.get("path").and_then(Value::as_str).unwrap_or("");
            if op.get("op").and_then(Value::as_str) == Some("replace")
                && path == "/metadata/resourceVersion"
            {
                check_version(&stored, op.get("value").and_then(Value::as_str))?;
            }
            touches_managed_fields |= path.starts_with("/metadata/managedFields");
        }

        let operations: json_patch::Patch = serde_json::from_value(patch.clone())?;
        let mut value = stored.to_value();
        json_patch::patch(&mut value, &operations.0)
            .map_err(|e| Error::PermanentError(format!("invalid JSON patch: {}", e)))?;
        let patched = Document::from_value(value)?;

        let entries = if touches_managed_fields {
            patched.managed_fields()?
        } else {
            record_update(
                stored.managed_fields()?,
                field_manager,
                stored.api_version(),
                "",
                stored.as_map(),
                patched.as_map(),
            )?
        };
        finish_write(&mut state, store_key, patched, &entries)
    }

    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document> {
        let mut state = self.lock()?;
        let store_key = state.store_key(key)?;
        let stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let subresource = subresource.unwrap_or("");
        let patch = match (subresource, patch) {
            ("", patch) => patch.clone(),
            (sub, Value::Object(map)) => {
                let mut only = Map::new();
                if let Some(part) = map.get(sub) {
                    only.insert(sub.to_string(), part.clone());
                }
                Value::Object(only)
            }
            (_, other) => other.clone(),
        };

        let mut value = stored.to_value();
        json_patch::merge(&mut value, &patch);
        let patched = Document::from_value(value)?;
        let entries = record_update(
            stored.managed_fields()?,
            field_manager,
            stored.api_version(),
            subresource,
            stored.as_map(),
            patched.as_map(),
        )?;
        finish_write(&mut state, store_key, patched, &entries)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let mut state = self.lock()?;
        let store_key = state.store_key(key)?;
        Ok(state.objects.remove(&store_key).is_some())
    }
}

fn check_version(stored: &Document, submitted: Option<&str>) -> Result<()> {
    match submitted {
        Some(version) if !version.is_empty() && Some(version) != stored.resource_version() => {
            Err(Error::Conflict(format!(
                "the object {} has been modified; resourceVersion {} is stale",
                stored.description(),
                version
            )))
        }
        _ => Ok(()),
    }
}

fn finish_write(
    state: &mut State,
    key: StoreKey,
    mut doc: Document,
    entries: &[ManagedFieldsEntry],
) -> Result<Document> {
    let entries: Vec<ManagedFieldsEntry> = entries
        .iter()
        .filter(|entry| {
            entry
                .fields_v1
                .as_ref()
                .is_some_and(|fields| fields.0.as_object().is_some_and(|map| !map.is_empty()))
        })
        .cloned()
        .collect();
    if entries.is_empty() {
        doc.remove(&["metadata", "managedFields"]);
    } else {
        doc.set_managed_fields(&entries)?;
    }
    let version = state.next_version();
    doc.set_resource_version(&version);
    trace!(
        "Stored {} at resourceVersion {}",
        doc.description(),
        version
    );
    state.objects.insert(key, doc.clone());
    Ok(doc)
}

fn is_entry(entry: &ManagedFieldsEntry, manager: &str, operation: &str, subresource: &str) -> bool {
    entry.manager.as_deref() == Some(manager)
        && entry.operation.as_deref() == Some(operation)
        && subresource_of(entry) == subresource
}

fn set_entry_fields(entry: &mut ManagedFieldsEntry, set: &FieldSet) {
    entry.fields_v1 = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::FieldsV1(
        set.to_fields_v1(),
    ));
}

/// Leaves of `fields` whose value differs between `before` and `after`
fn changed_fields(
    fields: &FieldSet,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> FieldSet {
    let mut changed = FieldSet::new();
    for path in fields.leaves() {
        if value_at(before, &path) != value_at(after, &path) {
            changed.insert(&path);
        }
    }
    changed
}

/// Managed-field bookkeeping for a non-apply write
fn record_update(
    mut entries: Vec<ManagedFieldsEntry>,
    manager: &str,
    api_version: &str,
    subresource: &str,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> Result<Vec<ManagedFieldsEntry>> {
    let set = changed_fields(&FieldSet::from_document(after), before, after);
    let removed = changed_fields(&FieldSet::from_document(before), before, after)
        .difference(&set);
    let touched = set.union(&removed);
    if touched.is_empty() {
        return Ok(entries);
    }

    let mut own = FieldSet::new();
    for entry in entries.iter_mut() {
        let current = entry_field_set(entry)?;
        if is_entry(entry, manager, UPDATE, subresource) {
            own = current;
        } else {
            set_entry_fields(entry, &current.difference(&touched));
        }
    }
    entries.retain(|entry| !is_entry(entry, manager, UPDATE, subresource));
    let own = own.union(&set).difference(&removed);
    entries.insert(
        0,
        new_entry(manager, UPDATE, api_version, subresource, &own),
    );
    Ok(entries)
}

fn value_at<'a>(map: &'a Map<String, Value>, path: &[PathElement]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let PathElement::Field(name) = first else {
        return None;
    };
    let value = map.get(name)?;
    if rest.is_empty() {
        Some(value)
    } else {
        value_at(value.as_object()?, rest)
    }
}

fn remove_at(map: &mut Map<String, Value>, path: &[PathElement]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let PathElement::Field(name) = first else {
        return;
    };
    if rest.is_empty() {
        map.remove(name);
        return;
    }
    if let Some(Value::Object(child)) = map.get_mut(name) {
        remove_at(child, rest);
        if child.is_empty() {
            map.remove(name);
        }
    }
}

/// Recursively merge maps; any other value in `patch` replaces the target
fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[derive(Debug)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Requirement::Equals(k, v) => doc.label(k) == Some(v.as_str()),
            Requirement::NotEquals(k, v) => doc.label(k) != Some(v.as_str()),
            Requirement::Exists(k) => doc.label(k).is_some(),
            Requirement::NotExists(k) => doc.label(k).is_none(),
        }
    }
}

/// Equality-based label selector (`a=b,c!=d,e,!f`)
fn parse_selector(selector: &str) -> Vec<Requirement> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if let Some((k, v)) = part.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = part.split_once("==").or_else(|| part.split_once('=')) {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = part.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else {
                Requirement::Exists(part.to_string())
            }
        })
        .collect()
}
