//! Multicast enablement translation
//!
//! OpenShift SDN keeps the flag on the NetNamespace, OVN-Kubernetes on the
//! Namespace itself.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{TranslationOutcome, mutate_with_retry};
use crate::controller::error::Result;
use crate::document::Document;
use crate::names::{DEFAULT_CLUSTER_NAME, OVN_MULTICAST_ANNOTATION, SDN_MULTICAST_ANNOTATION};
use crate::store::{ObjectKey, ObjectStore, kinds};

pub async fn migrate(store: &dyn ObjectStore, to_ovn: bool) -> Result<TranslationOutcome> {
    if to_ovn {
        to_namespaces(store).await
    } else {
        to_net_namespaces(store).await
    }
}

async fn to_namespaces(store: &dyn ObjectStore) -> Result<TranslationOutcome> {
    let net_namespaces = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::net_namespace(), None, None)
        .await?;
    let mut changed = 0;
    for netns in &net_namespaces {
        let Some(value) = netns.annotation(SDN_MULTICAST_ANNOTATION) else {
            continue;
        };
        let key = ObjectKey::local(kinds::namespace(), None, netns.name());
        if mutate_with_retry(store, &key, |ns| copy_annotation(ns, OVN_MULTICAST_ANNOTATION, value))
            .await?
        {
            changed += 1;
        }
    }
    info!("enabled multicast on {} namespaces", changed);
    Ok(TranslationOutcome::Translated)
}

async fn to_net_namespaces(store: &dyn ObjectStore) -> Result<TranslationOutcome> {
    let namespaces = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::namespace(), None, None)
        .await?;
    let net_namespaces = store
        .list(DEFAULT_CLUSTER_NAME, &kinds::net_namespace(), None, None)
        .await?;

    let known: BTreeSet<&str> = net_namespaces.iter().map(Document::name).collect();
    if let Some(missing) = namespaces.iter().find(|ns| !known.contains(ns.name())) {
        debug!("namespace {} has no NetNamespace yet", missing.name());
        return Ok(TranslationOutcome::WaitingForNodeReadiness);
    }

    let mut changed = 0;
    for ns in &namespaces {
        let Some(value) = ns.annotation(OVN_MULTICAST_ANNOTATION) else {
            continue;
        };
        let key = ObjectKey::local(kinds::net_namespace(), None, ns.name());
        if mutate_with_retry(store, &key, |netns| {
            copy_annotation(netns, SDN_MULTICAST_ANNOTATION, value)
        })
        .await?
        {
            changed += 1;
        }
    }
    info!("enabled multicast on {} NetNamespaces", changed);
    Ok(TranslationOutcome::Translated)
}

fn copy_annotation(obj: &mut Document, key: &str, value: &str) -> Result<bool> {
    if obj.annotation(key) == Some(value) {
        return Ok(false);
    }
    obj.set_annotation(key, value)?;
    Ok(true)
}
