//! Per-kind merge exceptions
//!
//! Some fields are populated by the server or by other controllers and
//! would be erased or contested if the rendered object were applied as-is.
//! Before an apply the matching merge function copies those fields from the
//! stored object into the desired one.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use kube::api::GroupVersionKind;

use crate::controller::error::{Error, Result};
use crate::document::Document;
use crate::names::DEPLOYMENT_REVISION_ANNOTATION;

/// Merge function: `(desired, stored)`
pub type MergeFn = fn(&mut Document, &Document) -> Result<()>;

/// Kinds that carry merge exceptions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKind {
    Deployment,
    Service,
    ServiceAccount,
    OperatorNetwork,
}

impl MergeKind {
    pub fn merge_fn(self) -> MergeFn {
        match self {
            MergeKind::Deployment => merge_deployment,
            MergeKind::Service => merge_service,
            MergeKind::ServiceAccount => merge_service_account,
            MergeKind::OperatorNetwork => merge_operator_network,
        }
    }
}

static REGISTRY: LazyLock<BTreeMap<(String, String), MergeKind>> = LazyLock::new(|| {
    [
        ("apps", "Deployment", MergeKind::Deployment),
        ("", "Service", MergeKind::Service),
        ("", "ServiceAccount", MergeKind::ServiceAccount),
        ("operator.openshift.io", "Network", MergeKind::OperatorNetwork),
    ]
    .into_iter()
    .map(|(group, kind, merge)| ((group.to_string(), kind.to_string()), merge))
    .collect()
});

/// Merge exception registered for a kind, if any
pub fn merge_kind(gvk: &GroupVersionKind) -> Option<MergeKind> {
    REGISTRY
        .get(&(gvk.group.clone(), gvk.kind.clone()))
        .copied()
}

/// Run the kind-specific merge; `stored` of `None` means nothing to merge
pub fn merge_for_apply(desired: &mut Document, stored: Option<&Document>) -> Result<()> {
    let Some(stored) = stored else {
        return Ok(());
    };
    let Some(kind) = merge_kind(&desired.gvk()?) else {
        return Ok(());
    };
    (kind.merge_fn())(desired, stored).map_err(|e| Error::MergeFailed {
        object: desired.description(),
        source: Box::new(e),
    })
}

/// Prepare `desired` for a full-object update against `stored`
///
/// Runs the kind-specific merge and then the generic metadata merge, so
/// annotation and label changes made by the kind merge survive.
pub fn merge_object_for_update(desired: &mut Document, stored: &Document) -> Result<()> {
    merge_for_apply(desired, Some(stored))?;
    merge_metadata(desired, stored).map_err(|e| Error::MergeFailed {
        object: desired.description(),
        source: Box::new(e),
    })
}

/// Reject objects this operator cannot manage
pub fn is_object_supported(obj: &Document) -> Result<()> {
    if obj.gvk()?.group.is_empty() && obj.kind() == "ServiceAccount" {
        let secrets = obj.get_slice(&["secrets"])?;
        if secrets.is_some_and(|s| !s.is_empty()) {
            return Err(Error::UnsupportedObject {
                object: obj.description(),
                reason: "cannot create ServiceAccount with secrets; they are managed by the token controller"
                    .to_string(),
            });
        }
    }
    Ok(())
}

const COPIED_METADATA: &[&str] = &[
    "creationTimestamp",
    "selfLink",
    "generation",
    "uid",
    "resourceVersion",
    "managedFields",
    "finalizers",
];

/// Carry server-owned metadata over and union annotations and labels
pub fn merge_metadata(desired: &mut Document, stored: &Document) -> Result<()> {
    for &field in COPIED_METADATA {
        match stored.get(&["metadata", field]) {
            Some(value) => desired.set(&["metadata", field], value.clone())?,
            None => {
                desired.remove(&["metadata", field]);
            }
        }
    }

    let mut annotations = stored.annotations()?;
    annotations.extend(desired.annotations()?);
    if !annotations.is_empty() {
        desired.set_annotations(&annotations)?;
    }

    let mut labels = stored.labels()?;
    labels.extend(desired.labels()?);
    if !labels.is_empty() {
        desired.set_labels(&labels)?;
    }
    Ok(())
}

fn merge_deployment(desired: &mut Document, stored: &Document) -> Result<()> {
    if let Some(revision) = stored.annotation(DEPLOYMENT_REVISION_ANNOTATION) {
        let revision = revision.to_string();
        desired.set_annotation(DEPLOYMENT_REVISION_ANNOTATION, &revision)?;
    }
    Ok(())
}

fn merge_service(desired: &mut Document, stored: &Document) -> Result<()> {
    for field in ["clusterIP", "clusterIPs", "ipFamilies"] {
        if let Some(value) = stored.get(&["spec", field]) {
            desired.set(&["spec", field], value.clone())?;
        }
    }
    if !desired.contains(&["spec", "ipFamilyPolicy"])
        && let Some(policy) = stored.get(&["spec", "ipFamilyPolicy"])
    {
        desired.set(&["spec", "ipFamilyPolicy"], policy.clone())?;
    }
    Ok(())
}

fn merge_service_account(desired: &mut Document, stored: &Document) -> Result<()> {
    for field in ["secrets", "imagePullSecrets"] {
        if let Some(value) = stored.get(&[field]) {
            desired.set(&[field], value.clone())?;
        }
    }
    Ok(())
}

// disableNetworkDiagnostics is a plain bool, so an apply would reset it
fn merge_operator_network(desired: &mut Document, stored: &Document) -> Result<()> {
    if let Some(disabled) = stored.get_bool(&["spec", "disableNetworkDiagnostics"])? {
        desired.set_bool(&["spec", "disableNetworkDiagnostics"], disabled)?;
    }
    Ok(())
}
