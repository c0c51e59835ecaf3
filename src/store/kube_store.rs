//! kube-rs backed object store
//!
//! Holds one client per named cluster and caches REST mappings discovered
//! through the API server.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::discovery::{self, Scope};
use kube::Client;
use serde_json::Value;
use tracing::{debug, trace};

use super::{ObjectKey, ObjectStore, ResourceMapping};
use crate::controller::error::{Error, Result};
use crate::document::Document;
use crate::names::DEFAULT_CLUSTER_NAME;

/// Page size used when listing
const LIST_PAGE_SIZE: u32 = 500;

type MappingCache = BTreeMap<(String, String, String, String), ResourceMapping>;

/// Object store backed by one or more Kubernetes API servers
pub struct KubeStore {
    clients: BTreeMap<String, Client>,
    mappings: RwLock<MappingCache>,
}

impl KubeStore {
    /// Store with only the default cluster
    pub fn new(client: Client) -> Self {
        Self::with_clusters(BTreeMap::from([(DEFAULT_CLUSTER_NAME.to_string(), client)]))
    }

    /// Store routing to several named clusters
    pub fn with_clusters(clients: BTreeMap<String, Client>) -> Self {
        Self {
            clients,
            mappings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Client for the default cluster
    pub fn default_client(&self) -> Option<Client> {
        self.clients.get(DEFAULT_CLUSTER_NAME).cloned()
    }

    fn client(&self, cluster: &str) -> Result<Client> {
        self.clients
            .get(cluster)
            .cloned()
            .ok_or_else(|| Error::UnknownCluster(cluster.to_string()))
    }

    async fn mapping(&self, cluster: &str, gvk: &GroupVersionKind) -> Result<ResourceMapping> {
        self.resolve(cluster, gvk).await?.ok_or_else(|| {
            Error::UnknownMapping(format!("{}/{} {}", gvk.group, gvk.version, gvk.kind))
        })
    }

    async fn api(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let client = self.client(cluster)?;
        let mapping = self.mapping(cluster, gvk).await?;
        Ok(match (mapping.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &mapping.api_resource),
            _ => Api::all_with(client, &mapping.api_resource),
        })
    }

    async fn api_for_key(&self, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        self.api(&key.cluster, &key.gvk, key.namespace.as_deref())
            .await
    }
}

fn cache_key(cluster: &str, gvk: &GroupVersionKind) -> (String, String, String, String) {
    (
        cluster.to_string(),
        gvk.group.clone(),
        gvk.version.clone(),
        gvk.kind.clone(),
    )
}

fn to_document(obj: DynamicObject) -> Result<Document> {
    Ok(Document::from_dynamic(&obj)?)
}

fn field_manager_params(field_manager: &str) -> PostParams {
    PostParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    fn has_cluster(&self, cluster: &str) -> bool {
        self.clients.contains_key(cluster)
    }

    async fn resolve(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
    ) -> Result<Option<ResourceMapping>> {
        let key = cache_key(cluster, gvk);
        if let Ok(cache) = self.mappings.read()
            && let Some(mapping) = cache.get(&key)
        {
            return Ok(Some(mapping.clone()));
        }

        let client = self.client(cluster)?;
        let (api_resource, capabilities) = match discovery::pinned_kind(&client, gvk).await {
            Ok(found) => found,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => return Ok(None),
            Err(kube::Error::Discovery(e)) => {
                debug!("No REST mapping for {:?}: {}", gvk, e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mapping = ResourceMapping {
            api_resource,
            namespaced: matches!(capabilities.scope, Scope::Namespaced),
        };
        if let Ok(mut cache) = self.mappings.write() {
            cache.insert(key, mapping.clone());
        }
        Ok(Some(mapping))
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Document>> {
        let api = self.api_for_key(key).await?;
        match api.get_opt(&key.name).await? {
            Some(obj) => Ok(Some(to_document(obj)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        cluster: &str,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Document>> {
        let api = self.api(cluster, gvk, namespace).await?;
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
            if let Some(selector) = label_selector {
                params = params.labels(selector);
            }
            if let Some(token) = &continue_token {
                params = params.continue_token(token);
            }

            let page = api.list(&params).await?;
            trace!("Listed {} {} objects", page.items.len(), gvk.kind);
            for obj in page.items {
                items.push(to_document(obj)?);
            }

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn create(
        &self,
        cluster: &str,
        obj: &Document,
        field_manager: &str,
    ) -> Result<Document> {
        let api = self.api(cluster, &obj.gvk()?, obj.namespace()).await?;
        let created = api
            .create(&field_manager_params(field_manager), &obj.to_dynamic()?)
            .await?;
        to_document(created)
    }

    async fn update(
        &self,
        cluster: &str,
        obj: &Document,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document> {
        let api = self.api(cluster, &obj.gvk()?, obj.namespace()).await?;
        let params = field_manager_params(field_manager);
        let updated = match subresource {
            Some(sub) => {
                api.replace_subresource(sub, obj.name(), &params, serde_json::to_vec(obj)?)
                    .await?
            }
            None => api.replace(obj.name(), &params, &obj.to_dynamic()?).await?,
        };
        to_document(updated)
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        obj: &Document,
        field_manager: &str,
        force: bool,
        subresources: &[String],
    ) -> Result<Document> {
        let api = self.api_for_key(key).await?;
        let mut params = PatchParams::apply(field_manager);
        if force {
            params = params.force();
        }
        let patch = Patch::Apply(obj.to_value());
        let applied = if subresources.is_empty() {
            api.patch(&key.name, &params, &patch).await?
        } else {
            api.patch_subresource(&subresources.join("/"), &key.name, &params, &patch)
                .await?
        };
        to_document(applied)
    }

    async fn json_patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        field_manager: &str,
    ) -> Result<Document> {
        let api = self.api_for_key(key).await?;
        let operations: json_patch::Patch = serde_json::from_value(patch.clone())?;
        let params = PatchParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };
        let patched = api
            .patch(&key.name, &params, &Patch::<Value>::Json(operations))
            .await?;
        to_document(patched)
    }

    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&str>,
        field_manager: &str,
    ) -> Result<Document> {
        let api = self.api_for_key(key).await?;
        let params = PatchParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };
        let patch = Patch::Merge(patch);
        let patched = match subresource {
            Some(sub) => api.patch_subresource(sub, &key.name, &params, &patch).await?,
            None => api.patch(&key.name, &params, &patch).await?,
        };
        to_document(patched)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let api = self.api_for_key(key).await?;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
