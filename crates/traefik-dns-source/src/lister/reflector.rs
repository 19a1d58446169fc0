//! Lister backed by watch-fed reflector caches

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::api::scoped_api;
use super::{merge_groups, sort_objects, with_cancel, ListError, RouteLister};
use crate::routes::{ApiGroup, RoutingKind};

/// Lists objects from reflector caches kept current by background watches.
///
/// The caches are eventually consistent: an object created moments ago may not
/// be listed yet. Reads never wait for the cache; call
/// [`ReflectorLister::wait_until_ready`] once after starting.
pub struct ReflectorLister {
    stores: HashMap<RoutingKind, Vec<(ApiGroup, Store<DynamicObject>)>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReflectorLister {
    /// Start one watch per kind and group. Must be called within a Tokio runtime.
    pub fn start(client: Client, namespace: &str, groups: &[ApiGroup]) -> Self {
        let mut stores = HashMap::new();
        let mut tasks = Vec::new();

        for kind in RoutingKind::ALL {
            let mut per_group = Vec::with_capacity(groups.len());

            for &group in groups {
                let api = scoped_api(client.clone(), namespace, kind, group);
                let writer = Writer::new(kind.api_resource(group));
                let store = writer.as_reader();

                let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
                    .default_backoff();

                tasks.push(tokio::spawn(async move {
                    stream
                        .for_each(move |event| async move {
                            if let Err(e) = event {
                                warn!(
                                    kind = %kind,
                                    group = group.name(),
                                    error = %e,
                                    "Watch error"
                                );
                            }
                        })
                        .await;
                    warn!(kind = %kind, group = group.name(), "Watch stream ended");
                }));

                debug!(kind = %kind, group = group.name(), namespace = %namespace, "Started watch");
                per_group.push((group, store));
            }

            stores.insert(kind, per_group);
        }

        Self { stores, tasks }
    }

    /// Wait until every cache has completed its initial listing.
    ///
    /// Fails with [`ListError::SyncTimeout`] naming the first cache still
    /// unsynced once `timeout` has passed.
    pub async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), ListError> {
        let deadline = Instant::now() + timeout;

        for kind in RoutingKind::ALL {
            let Some(stores) = self.stores.get(&kind) else {
                continue;
            };
            for (group, store) in stores {
                with_cancel(cancel, async {
                    match timeout_at(deadline, store.wait_until_ready()).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(_)) => Err(ListError::CacheClosed(kind)),
                        Err(_) => Err(ListError::SyncTimeout {
                            kind,
                            group: group.name(),
                            timeout,
                        }),
                    }
                })
                .await?;
                info!(kind = %kind, group = group.name(), "Watch cache synced");
            }
        }
        Ok(())
    }
}

impl Drop for ReflectorLister {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl RouteLister for ReflectorLister {
    #[instrument(skip(self, cancel), fields(kind = %kind))]
    async fn list(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<DynamicObject>>, ListError> {
        if cancel.is_cancelled() {
            return Err(ListError::Cancelled);
        }

        let Some(stores) = self.stores.get(&kind) else {
            return Ok(Vec::new());
        };

        let groups = stores
            .iter()
            .map(|(_, store)| {
                // Cache iteration order is arbitrary
                let mut objects = store.state();
                sort_objects(&mut objects);
                objects
            })
            .collect();

        Ok(merge_groups(groups))
    }
}
