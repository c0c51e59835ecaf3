//! Field sets as recorded in `metadata.managedFields`
//!
//! The wire form (`FieldsV1`) is a JSON trie. Every key is a path element
//! with a one-letter prefix:
//!
//! - `f:<name>` a struct or map field
//! - `k:<json>` a list item identified by its key fields
//! - `v:<json>` a set item identified by its value
//! - `i:<n>` a list item identified by position
//!
//! A node with no children is a member of the set. A node that has children
//! and is itself a member carries the `"."` marker.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::controller::error::{Error, Result};

const SELF_MARKER: &str = ".";

/// One step in a field path
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathElement {
    Field(String),
    Key(String),
    Value(String),
    Index(u64),
}

impl PathElement {
    /// Parse a prefixed wire key such as `f:spec`
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((prefix, rest)) = raw.split_once(':') else {
            return Err(Error::FieldSetError(format!(
                "path element {:?} has no type prefix",
                raw
            )));
        };
        match prefix {
            "f" => Ok(PathElement::Field(rest.to_string())),
            "k" => {
                let key: Value = serde_json::from_str(rest).map_err(|e| {
                    Error::FieldSetError(format!("invalid key element {:?}: {}", raw, e))
                })?;
                if !key.is_object() {
                    return Err(Error::FieldSetError(format!(
                        "key element {:?} is not a JSON object",
                        raw
                    )));
                }
                Ok(PathElement::Key(rest.to_string()))
            }
            "v" => {
                serde_json::from_str::<Value>(rest).map_err(|e| {
                    Error::FieldSetError(format!("invalid value element {:?}: {}", raw, e))
                })?;
                Ok(PathElement::Value(rest.to_string()))
            }
            "i" => rest.parse().map(PathElement::Index).map_err(|_| {
                Error::FieldSetError(format!("invalid index element {:?}", raw))
            }),
            other => Err(Error::FieldSetError(format!(
                "unknown path element prefix {:?} in {:?}",
                other, raw
            ))),
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Field(name) => write!(f, "f:{}", name),
            PathElement::Key(key) => write!(f, "k:{}", key),
            PathElement::Value(value) => write!(f, "v:{}", value),
            PathElement::Index(index) => write!(f, "i:{}", index),
        }
    }
}

/// A path from the object root to one owned field
pub type FieldPath = Vec<PathElement>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Node {
    member: bool,
    children: FieldSet,
}

/// A set of field paths stored as a trie
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSet {
    children: BTreeMap<PathElement, Node>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Add a single path
    pub fn insert(&mut self, path: &[PathElement]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        let node = self.children.entry(first.clone()).or_default();
        if rest.is_empty() {
            node.member = true;
        } else {
            node.children.insert(rest);
        }
    }

    pub fn contains(&self, path: &[PathElement]) -> bool {
        let Some((first, rest)) = path.split_first() else {
            return false;
        };
        match self.children.get(first) {
            Some(node) if rest.is_empty() => node.member,
            Some(node) => node.children.contains(rest),
            None => false,
        }
    }

    /// Paths present in either set
    pub fn union(&self, other: &FieldSet) -> FieldSet {
        let mut out = self.clone();
        for (element, theirs) in &other.children {
            let node = out.children.entry(element.clone()).or_default();
            node.member |= theirs.member;
            node.children = node.children.union(&theirs.children);
        }
        out
    }

    /// Paths present in `self` but not in `other`
    pub fn difference(&self, other: &FieldSet) -> FieldSet {
        let mut out = FieldSet::new();
        for (element, ours) in &self.children {
            let node = match other.children.get(element) {
                Some(theirs) => Node {
                    member: ours.member && !theirs.member,
                    children: ours.children.difference(&theirs.children),
                },
                None => ours.clone(),
            };
            if node.member || !node.children.is_empty() {
                out.children.insert(element.clone(), node);
            }
        }
        out
    }

    /// Every member path, in sorted order
    pub fn leaves(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves(&self, prefix: &mut FieldPath, out: &mut Vec<FieldPath>) {
        for (element, node) in &self.children {
            prefix.push(element.clone());
            if node.member {
                out.push(prefix.clone());
            }
            node.children.collect_leaves(prefix, out);
            prefix.pop();
        }
    }

    /// Decode the `FieldsV1` JSON form
    pub fn from_fields_v1(value: &Value) -> Result<FieldSet> {
        let map = match value {
            Value::Null => return Ok(FieldSet::new()),
            Value::Object(map) => map,
            other => {
                return Err(Error::FieldSetError(format!(
                    "expected a JSON object, found {}",
                    other
                )));
            }
        };

        let mut set = FieldSet::new();
        for (raw, child) in map {
            if raw == SELF_MARKER {
                continue;
            }
            let element = PathElement::parse(raw)?;
            let child_map = child.as_object().ok_or_else(|| {
                Error::FieldSetError(format!("value of {:?} is not a JSON object", raw))
            })?;
            let children = FieldSet::from_fields_v1(child)?;
            let member = child_map.is_empty() || child_map.contains_key(SELF_MARKER);
            set.children.insert(element, Node { member, children });
        }
        Ok(set)
    }

    /// Encode into the `FieldsV1` JSON form
    pub fn to_fields_v1(&self) -> Value {
        let mut map = Map::new();
        for (element, node) in &self.children {
            let mut child = match node.children.to_fields_v1() {
                Value::Object(child) => child,
                _ => Map::new(),
            };
            if node.member && !child.is_empty() {
                child.insert(SELF_MARKER.to_string(), Value::Object(Map::new()));
            }
            map.insert(element.to_string(), Value::Object(child));
        }
        Value::Object(map)
    }

    /// Fields a writer sets when it submits `document`
    ///
    /// Lists are treated as atomic, and server-populated identity and
    /// bookkeeping metadata are left out.
    pub fn from_document(document: &Map<String, Value>) -> FieldSet {
        let mut set = FieldSet::new();
        for (key, value) in document {
            if key == "apiVersion" || key == "kind" {
                continue;
            }
            let element = PathElement::Field(key.clone());
            let node = if key == "metadata" {
                match value {
                    Value::Object(metadata) => {
                        let filtered: Map<String, Value> = metadata
                            .iter()
                            .filter(|(k, _)| !SERVER_METADATA.contains(&k.as_str()))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        if filtered.is_empty() {
                            continue;
                        }
                        Node {
                            member: false,
                            children: FieldSet::from_document(&filtered),
                        }
                    }
                    _ => continue,
                }
            } else {
                value_node(value)
            };
            set.children.insert(element, node);
        }
        set
    }
}

const SERVER_METADATA: &[&str] = &[
    "name",
    "namespace",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];

fn value_node(value: &Value) -> Node {
    match value {
        Value::Object(map) if !map.is_empty() => {
            let mut children = FieldSet::new();
            for (key, child) in map {
                children
                    .children
                    .insert(PathElement::Field(key.clone()), value_node(child));
            }
            Node {
                member: false,
                children,
            }
        }
        _ => Node {
            member: true,
            children: FieldSet::new(),
        },
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self
            .leaves()
            .iter()
            .map(|path| {
                path.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .collect();
        write!(f, "{{{}}}", paths.join(", "))
    }
}
