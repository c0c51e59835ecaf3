//! Loosely-typed Kubernetes documents
//!
//! Rendered manifests and objects read back from the API server are handled
//! as plain JSON maps. `Document` wraps such a map and offers path-based
//! accessors that distinguish a field that is absent (`Ok(None)`) from a
//! field that is present with the wrong type (`Err(DocumentError::WrongType)`).

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use kube::api::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while reading or writing document fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("field {path}: expected {expected}, found {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),
}

type DocResult<T> = std::result::Result<T, DocumentError>;

/// A Kubernetes object as an untyped JSON map
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty object of the given type
    pub fn new(api_version: &str, kind: &str) -> Self {
        let mut map = Map::new();
        map.insert("apiVersion".into(), Value::String(api_version.into()));
        map.insert("kind".into(), Value::String(kind.into()));
        map.insert("metadata".into(), Value::Object(Map::new()));
        Self(map)
    }

    /// Create an object of the given type with a name and optional namespace
    pub fn named(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        let mut doc = Self::new(api_version, kind);
        doc.set_name(name);
        if let Some(ns) = namespace {
            doc.set_namespace(ns);
        }
        doc
    }

    /// Wrap a JSON value; it must be an object
    pub fn from_value(value: Value) -> DocResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DocumentError::InvalidObject(format!(
                "expected a JSON object, found {}",
                type_name(&other)
            ))),
        }
    }

    /// Convert from a kube `DynamicObject`
    pub fn from_dynamic(obj: &DynamicObject) -> DocResult<Self> {
        let value =
            serde_json::to_value(obj).map_err(|e| DocumentError::InvalidObject(e.to_string()))?;
        Self::from_value(value)
    }

    /// Convert into a kube `DynamicObject`
    pub fn to_dynamic(&self) -> DocResult<DynamicObject> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| DocumentError::InvalidObject(e.to_string()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(Value::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.get(&["metadata", "name"])
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get(&["metadata", "namespace"])
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .insert("name".into(), Value::String(name.into()));
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".into(), Value::String(namespace.into()));
    }

    /// Group, version and kind parsed from `apiVersion` and `kind`
    pub fn gvk(&self) -> DocResult<GroupVersionKind> {
        let api_version = self.api_version();
        let kind = self.kind();
        if api_version.is_empty() || kind.is_empty() {
            return Err(DocumentError::InvalidObject(
                "object has no apiVersion or kind".to_string(),
            ));
        }
        let (group, version) = split_api_version(api_version);
        Ok(GroupVersionKind::gvk(group, version, kind))
    }

    /// Human-readable identity used in logs and error messages
    pub fn description(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("({}) {}/{}", self.kind_with_version(), ns, self.name()),
            None => format!("({}) /{}", self.kind_with_version(), self.name()),
        }
    }

    fn kind_with_version(&self) -> String {
        format!("{}, Kind={}", self.api_version(), self.kind())
    }

    /// Raw access to a nested field
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// True when the field is present, whatever its type
    pub fn contains(&self, path: &[&str]) -> bool {
        self.get(path).is_some()
    }

    pub fn get_string(&self, path: &[&str]) -> DocResult<Option<String>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(path, "string", other)),
        }
    }

    pub fn get_bool(&self, path: &[&str]) -> DocResult<Option<bool>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(wrong_type(path, "bool", other)),
        }
    }

    pub fn get_i64(&self, path: &[&str]) -> DocResult<Option<i64>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| wrong_type(path, "int64", &Value::Number(n.clone()))),
            Some(other) => Err(wrong_type(path, "int64", other)),
        }
    }

    pub fn get_slice(&self, path: &[&str]) -> DocResult<Option<&Vec<Value>>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(wrong_type(path, "array", other)),
        }
    }

    pub fn get_map(&self, path: &[&str]) -> DocResult<Option<&Map<String, Value>>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(wrong_type(path, "object", other)),
        }
    }

    pub fn get_string_slice(&self, path: &[&str]) -> DocResult<Option<Vec<String>>> {
        let Some(items) = self.get_slice(path)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(wrong_type(path, "[]string", other)),
            })
            .collect::<DocResult<Vec<_>>>()
            .map(Some)
    }

    pub fn get_string_map(&self, path: &[&str]) -> DocResult<Option<BTreeMap<String, String>>> {
        let Some(map) = self.get_map(path)? else {
            return Ok(None);
        };
        map.iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                other => Err(wrong_type(path, "map[string]string", other)),
            })
            .collect::<DocResult<BTreeMap<_, _>>>()
            .map(Some)
    }

    /// Set a nested field, creating intermediate objects as needed
    pub fn set(&mut self, path: &[&str], value: Value) -> DocResult<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(DocumentError::InvalidObject("empty field path".to_string()));
        };
        let mut current = &mut self.0;
        for (depth, key) in parents.iter().enumerate() {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                other => return Err(wrong_type(&path[..=depth], "object", other)),
            };
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    pub fn set_string(&mut self, path: &[&str], value: &str) -> DocResult<()> {
        self.set(path, Value::String(value.to_string()))
    }

    pub fn set_bool(&mut self, path: &[&str], value: bool) -> DocResult<()> {
        self.set(path, Value::Bool(value))
    }

    pub fn set_string_slice(&mut self, path: &[&str], values: &[String]) -> DocResult<()> {
        self.set(
            path,
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        )
    }

    pub fn set_string_map(
        &mut self,
        path: &[&str],
        values: &BTreeMap<String, String>,
    ) -> DocResult<()> {
        let map = values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.set(path, Value::Object(map))
    }

    /// Remove a nested field, returning its previous value
    pub fn remove(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        let mut current = &mut self.0;
        for key in parents {
            current = current.get_mut(*key)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    pub fn annotations(&self) -> DocResult<BTreeMap<String, String>> {
        Ok(self
            .get_string_map(&["metadata", "annotations"])?
            .unwrap_or_default())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.get(&["metadata", "annotations", key])
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) -> DocResult<()> {
        self.set_string(&["metadata", "annotations", key], value)
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<Value> {
        self.remove(&["metadata", "annotations", key])
    }

    pub fn set_annotations(&mut self, annotations: &BTreeMap<String, String>) -> DocResult<()> {
        self.set_string_map(&["metadata", "annotations"], annotations)
    }

    pub fn labels(&self) -> DocResult<BTreeMap<String, String>> {
        Ok(self
            .get_string_map(&["metadata", "labels"])?
            .unwrap_or_default())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.get(&["metadata", "labels", key]).and_then(Value::as_str)
    }

    pub fn set_label(&mut self, key: &str, value: &str) -> DocResult<()> {
        self.set_string(&["metadata", "labels", key], value)
    }

    pub fn remove_label(&mut self, key: &str) -> Option<Value> {
        self.remove(&["metadata", "labels", key])
    }

    pub fn set_labels(&mut self, labels: &BTreeMap<String, String>) -> DocResult<()> {
        self.set_string_map(&["metadata", "labels"], labels)
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.get(&["metadata", "resourceVersion"])
            .and_then(Value::as_str)
    }

    pub fn set_resource_version(&mut self, version: &str) {
        self.metadata_mut()
            .insert("resourceVersion".into(), Value::String(version.into()));
    }

    /// Decode `metadata.managedFields`
    pub fn managed_fields(&self) -> DocResult<Vec<ManagedFieldsEntry>> {
        match self.get(&["metadata", "managedFields"]) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                DocumentError::InvalidObject(format!("invalid managedFields: {}", e))
            }),
        }
    }

    pub fn set_managed_fields(&mut self, entries: &[ManagedFieldsEntry]) -> DocResult<()> {
        let value = serde_json::to_value(entries)
            .map_err(|e| DocumentError::InvalidObject(e.to_string()))?;
        self.set(&["metadata", "managedFields"], value)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("metadata was just replaced with an object"),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl TryFrom<Value> for Document {
    type Error = DocumentError;

    fn try_from(value: Value) -> DocResult<Self> {
        Self::from_value(value)
    }
}

/// Split `group/version` (or a bare core `version`) into its parts
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Join a group and version into an `apiVersion` string
pub fn api_version_of(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

fn wrong_type(path: &[&str], expected: &'static str, found: &Value) -> DocumentError {
    DocumentError::WrongType {
        path: path.join("."),
        expected,
        found: type_name(found),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
