//! Desired-state rendering
//!
//! A [`Renderer`] turns the operator configuration into the ordered list of
//! objects the reconciler applies. Rendering has no side effects, so it is
//! safe to repeat on every pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::controller::applied_config::applied_snapshot;
use crate::controller::error::{Error, Result};
use crate::crd::{NetworkSpec, NetworkType};
use crate::document::Document;
use crate::names::{NETWORK_TYPE_ANNOTATION, OPERATOR_CONFIG_NAME};

/// Facts about the cluster's infrastructure
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfraFacts {
    pub platform_type: String,
}

/// Everything a render depends on
#[derive(Clone, Copy, Debug)]
pub struct RenderInput<'a> {
    pub spec: &'a NetworkSpec,
    pub infra: &'a InfraFacts,
    pub feature_gates: &'a BTreeSet<String>,
}

/// Produces the desired objects for a configuration
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, input: &RenderInput<'_>) -> Result<Vec<Document>>;
}

/// Renders pre-built manifests from a directory
///
/// Files are read in name order; each may hold several YAML documents.
/// Documents annotated for another network type are skipped. The
/// applied-configuration snapshot always comes first and the cluster
/// network config status last.
pub struct ManifestRenderer {
    dir: PathBuf,
}

impl ManifestRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::InvalidConfig(format!("cannot read manifest dir {}: {}", self.dir.display(), e))
        })?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            Error::InvalidConfig(format!("cannot read manifest dir {}: {}", self.dir.display(), e))
        })? {
            let path = entry.path();
            let is_manifest = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
            if is_manifest {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Renderer for ManifestRenderer {
    async fn render(&self, input: &RenderInput<'_>) -> Result<Vec<Document>> {
        let network_type = input.spec.default_network.type_;
        let mut objects = vec![applied_snapshot(OPERATOR_CONFIG_NAME, input.spec)?];

        for path in self.manifest_files().await? {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::InvalidConfig(format!("cannot read manifest {}: {}", path.display(), e))
            })?;
            let docs = parse_manifests(&content)?;
            debug!("loaded {} objects from {}", docs.len(), path.display());
            objects.extend(
                docs.into_iter()
                    .filter(|doc| selected_for(doc, network_type)),
            );
        }

        objects.push(cluster_config_status(input.spec)?);
        Ok(objects)
    }
}

/// Parse a multi-document YAML stream, skipping empty documents
pub fn parse_manifests(content: &str) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(de)?;
        if value.is_null() {
            continue;
        }
        docs.push(Document::from_value(value)?);
    }
    Ok(docs)
}

fn selected_for(doc: &Document, network_type: NetworkType) -> bool {
    doc.annotation(NETWORK_TYPE_ANNOTATION)
        .is_none_or(|wanted| wanted == network_type.as_str())
}

/// The cluster network config status published from the operator spec
fn cluster_config_status(spec: &NetworkSpec) -> Result<Document> {
    let mut doc = Document::named(
        "config.openshift.io/v1",
        "Network",
        None,
        OPERATOR_CONFIG_NAME,
    );
    let cluster_network: Vec<Value> = spec
        .cluster_network
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    doc.set(&["status", "clusterNetwork"], Value::Array(cluster_network))?;
    doc.set_string_slice(&["status", "serviceNetwork"], &spec.service_network)?;
    Ok(doc)
}
