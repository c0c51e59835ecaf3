//! Object apply orchestration
//!
//! [`apply_object`] is the single path through which rendered objects reach
//! the store. It resolves the target cluster and resource, honours the
//! skip annotations, runs the merge exceptions, migrates field ownership to
//! the per-subcontroller manager and finally issues a forced server-side
//! apply.

pub mod field_manager;
pub mod fieldpath;
pub mod merge;

use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::document::Document;
use crate::names::{
    COPY_FROM_ANNOTATION, CREATE_ONLY_ANNOTATION, CREATE_WAIT_ANNOTATION, FIELD_MANAGER,
};
use crate::store::{ObjectKey, ObjectStore, cluster_name};

pub use field_manager::{
    UpgradeOptions, consolidate_apply_manager, drop_deprecated_manager, upgrade_managed_fields,
    upgrade_managed_fields_patch,
};
pub use fieldpath::{FieldSet, PathElement};
pub use merge::{is_object_supported, merge_object_for_update};

/// Field manager used for an apply, optionally narrowed to a subcontroller
pub fn field_manager_for(subcontroller: Option<&str>) -> String {
    match subcontroller {
        Some(sub) if !sub.is_empty() => format!("{}/{}", FIELD_MANAGER, sub),
        _ => FIELD_MANAGER.to_string(),
    }
}

/// Parsed value of the copy-from annotation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopySource {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
}

impl CopySource {
    /// Accepts `name`, `namespace/name` or `cluster/namespace/name`
    pub fn parse(reference: &str) -> Result<Self> {
        let parts: Vec<&str> = reference.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "invalid {} reference {:?}",
                COPY_FROM_ANNOTATION, reference
            )));
        }
        match parts.as_slice() {
            [name] => Ok(Self {
                cluster: None,
                namespace: None,
                name: name.to_string(),
            }),
            [namespace, name] => Ok(Self {
                cluster: None,
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            }),
            [cluster, namespace, name] => Ok(Self {
                cluster: Some(cluster.to_string()),
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            }),
            _ => Err(Error::InvalidConfig(format!(
                "invalid {} reference {:?}",
                COPY_FROM_ANNOTATION, reference
            ))),
        }
    }
}

/// Push `desired` to the store with server-side apply
///
/// With a subcontroller the field manager becomes
/// `cluster-network-operator/<subcontroller>` and any ownership still held
/// by the bare `cluster-network-operator` manager is moved over first.
pub async fn apply_object(
    store: &dyn ObjectStore,
    desired: &Document,
    subcontroller: Option<&str>,
    subresources: &[String],
) -> Result<()> {
    let cluster = cluster_name(desired).to_string();
    if !store.has_cluster(&cluster) {
        return Err(Error::UnknownCluster(cluster));
    }

    let gvk = desired.gvk().map_err(|e| Error::ApplyFailed {
        object: desired.description(),
        source: Box::new(e.into()),
    })?;
    if desired.name().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "object {} has no name",
            desired.description()
        )));
    }

    let mut obj = desired.clone();
    obj.remove(&["metadata", "managedFields"]);

    if let Some(reference) = obj.annotation(COPY_FROM_ANNOTATION).map(str::to_string) {
        obj = copy_from(store, &obj, &cluster, &reference).await?;
    }
    let description = obj.description();
    info!("reconciling {}", description);

    let mapping = store
        .resolve(&cluster, &gvk)
        .await?
        .ok_or_else(|| Error::UnknownMapping(description.clone()))?;
    let namespace = if mapping.namespaced {
        obj.namespace()
    } else {
        None
    };
    let key = ObjectKey::new(&cluster, gvk.clone(), namespace, obj.name());

    if obj.annotation(CREATE_WAIT_ANNOTATION).is_some() {
        if store.get(&key).await?.is_none() {
            info!(
                "{} is not created yet, waiting for someone else to create it",
                description
            );
        } else {
            debug!("{} exists and is marked create-wait, skipping", description);
        }
        return Ok(());
    }

    let mut stored: Option<Option<Document>> = None;
    if obj.annotation(CREATE_ONLY_ANNOTATION).is_some() {
        let current = store.get(&key).await?;
        if current.is_some() {
            debug!("{} exists and is marked create-only, skipping", description);
            return Ok(());
        }
        stored = Some(current);
    }

    is_object_supported(&obj)?;
    if merge::merge_kind(&gvk).is_some() {
        let current = match stored {
            Some(current) => current,
            None => store.get(&key).await?,
        };
        merge::merge_for_apply(&mut obj, current.as_ref())?;
    }

    let field_manager = field_manager_for(subcontroller);
    if subcontroller.is_some_and(|s| !s.is_empty()) {
        drop_deprecated_manager(store, &key, FIELD_MANAGER, &field_manager, true)
            .await
            .map_err(|e| Error::ApplyFailed {
                object: description.clone(),
                source: Box::new(e),
            })?;
    }

    store
        .apply(&key, &obj, &field_manager, true, subresources)
        .await
        .map_err(|e| apply_error(&obj, e))?;

    info!("apply of {} successful", description);
    Ok(())
}

fn apply_error(obj: &Document, err: Error) -> Error {
    let missing_namespace = obj.kind() == "NetworkAttachmentDefinition"
        && err.is_not_found()
        && err.to_string().contains("namespaces");
    let source = if missing_namespace {
        Error::NotFound(format!(
            "namespace {:?} for NetworkAttachmentDefinition {:?} does not exist; \
             create it before adding the additional network",
            obj.namespace().unwrap_or(""),
            obj.name()
        ))
    } else {
        err
    };
    Error::ApplyFailed {
        object: obj.description(),
        source: Box::new(source),
    }
}

async fn copy_from(
    store: &dyn ObjectStore,
    obj: &Document,
    cluster: &str,
    reference: &str,
) -> Result<Document> {
    let source = CopySource::parse(reference)?;
    let source_cluster = source.cluster.as_deref().unwrap_or(cluster);
    let source_namespace = source.namespace.as_deref().or(obj.namespace());
    let key = ObjectKey::new(source_cluster, obj.gvk()?, source_namespace, &source.name);

    let template = store.get(&key).await?.ok_or_else(|| {
        Error::NotFound(format!(
            "copy-from source {} of {}",
            key,
            obj.description()
        ))
    })?;
    debug!("copying {} from {}", obj.description(), key);

    let mut copy = template;
    for field in [
        "uid",
        "resourceVersion",
        "creationTimestamp",
        "generation",
        "selfLink",
        "managedFields",
    ] {
        copy.remove(&["metadata", field]);
    }
    copy.remove(&["status"]);

    copy.set_name(obj.name());
    match obj.namespace() {
        Some(ns) => copy.set_namespace(ns),
        None => {
            copy.remove(&["metadata", "namespace"]);
        }
    }
    for field in ["labels", "ownerReferences", "finalizers"] {
        match obj.get(&["metadata", field]) {
            Some(value) => copy.set(&["metadata", field], value.clone())?,
            None => {
                copy.remove(&["metadata", field]);
            }
        }
    }

    let mut annotations = copy.annotations()?;
    annotations.extend(obj.annotations()?);
    copy.set_annotations(&annotations)?;
    Ok(copy)
}

/// Read-modify-write update of a whole object
///
/// The stored object's server-owned metadata and merge exceptions are
/// carried into `desired` before the update, so the write is guarded by the
/// resourceVersion that was read.
pub async fn update_object(
    store: &dyn ObjectStore,
    desired: &Document,
    subresource: Option<&str>,
    field_manager: &str,
) -> Result<Document> {
    let key = ObjectKey::for_document(desired)?;
    let stored = store
        .get(&key)
        .await?
        .ok_or_else(|| Error::NotFound(desired.description()))?;
    let mut obj = desired.clone();
    merge_object_for_update(&mut obj, &stored)?;
    store
        .update(&key.cluster, &obj, subresource, field_manager)
        .await
        .map_err(|e| Error::ApplyFailed {
            object: desired.description(),
            source: Box::new(e),
        })
}

/// Delete an object; absent objects are not an error
pub async fn delete_object(store: &dyn ObjectStore, obj: &Document) -> Result<()> {
    let key = ObjectKey::for_document(obj)?;
    if store.delete(&key).await? {
        info!("deleted {}", obj.description());
    } else {
        debug!("{} already absent", obj.description());
    }
    Ok(())
}
