//! Listing routing objects from the cluster
//!
//! A [`RouteLister`] returns a point-in-time snapshot of the raw objects of one
//! [`RoutingKind`] within its namespace scope. Decoding and filtering happen in
//! the source; listers only fetch.
//!
//! Backends:
//! - [`ApiLister`]: one API list call per request
//! - [`ReflectorLister`]: reads from watch-backed reflector caches
//! - [`SnapshotLister`]: in-memory objects, for tests and offline rendering

mod api;
mod reflector;
mod snapshot;

pub use api::ApiLister;
pub use reflector::ReflectorLister;
pub use snapshot::{ManifestError, SnapshotLister};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::Discovery;
use kube::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::routes::{ApiGroup, RoutingKind};

#[derive(Debug, Error)]
pub enum ListError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("List cancelled")]
    Cancelled,
    #[error("Watch cache for {0} has stopped")]
    CacheClosed(RoutingKind),
    #[error("Watch cache for {kind} in {group} not synced after {timeout:?}")]
    SyncTimeout {
        kind: RoutingKind,
        group: &'static str,
        timeout: Duration,
    },
    #[error("None of the enabled Traefik API groups are served by the cluster")]
    NoServedGroups,
}

/// Capability to list raw routing objects of a kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteLister: Send + Sync {
    /// Current objects of `kind`, in a stable order.
    ///
    /// Returns [`ListError::Cancelled`] if `cancel` fires before the snapshot is taken.
    async fn list(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<DynamicObject>>, ListError>;
}

#[async_trait]
impl<L: RouteLister + ?Sized> RouteLister for Arc<L> {
    async fn list(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<DynamicObject>>, ListError> {
        (**self).list(kind, cancel).await
    }
}

/// The enabled API groups the cluster actually serves, in their original order.
///
/// Watching a group whose CRDs are not installed never completes its initial
/// listing, so absent groups are dropped here with a warning.
pub async fn served_groups(
    client: &Client,
    groups: &[ApiGroup],
) -> Result<Vec<ApiGroup>, ListError> {
    let names: Vec<&str> = groups.iter().map(|g| g.name()).collect();
    let discovery = Discovery::new(client.clone()).filter(&names).run().await?;

    let served = retain_served(groups, |name| discovery.has_group(name));
    if served.is_empty() {
        return Err(ListError::NoServedGroups);
    }
    Ok(served)
}

pub(crate) fn retain_served<F>(groups: &[ApiGroup], is_served: F) -> Vec<ApiGroup>
where
    F: Fn(&str) -> bool,
{
    groups
        .iter()
        .copied()
        .filter(|group| {
            let served = is_served(group.name());
            if served {
                info!(group = group.name(), "API group served");
            } else {
                warn!(group = group.name(), "API group not served by the cluster, skipping");
            }
            served
        })
        .collect()
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ListError>
where
    F: Future<Output = Result<T, ListError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ListError::Cancelled),
        result = fut => result,
    }
}

/// Concatenate per-group listings, dropping objects whose namespace/name was
/// already seen in an earlier group.
pub(crate) fn merge_groups(groups: Vec<Vec<Arc<DynamicObject>>>) -> Vec<Arc<DynamicObject>> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for obj in groups.into_iter().flatten() {
        let key = (
            obj.metadata.namespace.clone().unwrap_or_default(),
            obj.metadata.name.clone().unwrap_or_default(),
        );
        if seen.insert(key) {
            merged.push(obj);
        }
    }

    merged
}

/// Sort objects by namespace, then name
pub(crate) fn sort_objects(objects: &mut [Arc<DynamicObject>]) {
    objects.sort_by(|a, b| {
        (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
    });
}
