//! Lister that queries the API server on every call

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{merge_groups, with_cancel, ListError, RouteLister};
use crate::routes::{ApiGroup, RoutingKind};

/// Lists objects straight from the API server on every call
pub struct ApiLister {
    apis: HashMap<RoutingKind, Vec<(ApiGroup, Api<DynamicObject>)>>,
}

impl ApiLister {
    /// Create a lister for `namespace` (empty for all namespaces) across `groups`.
    ///
    /// Earlier groups win when the same namespace/name exists in several.
    pub fn new(client: Client, namespace: &str, groups: &[ApiGroup]) -> Self {
        let apis = RoutingKind::ALL
            .into_iter()
            .map(|kind| {
                let per_group = groups
                    .iter()
                    .map(|&group| (group, scoped_api(client.clone(), namespace, kind, group)))
                    .collect();
                (kind, per_group)
            })
            .collect();

        Self { apis }
    }
}

pub(crate) fn scoped_api(
    client: Client,
    namespace: &str,
    kind: RoutingKind,
    group: ApiGroup,
) -> Api<DynamicObject> {
    let resource = kind.api_resource(group);
    if namespace.is_empty() {
        Api::all_with(client, &resource)
    } else {
        Api::namespaced_with(client, namespace, &resource)
    }
}

#[async_trait]
impl RouteLister for ApiLister {
    #[instrument(skip(self, cancel), fields(kind = %kind))]
    async fn list(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<DynamicObject>>, ListError> {
        let Some(apis) = self.apis.get(&kind) else {
            return Ok(Vec::new());
        };

        let params = ListParams::default();
        let mut groups = Vec::with_capacity(apis.len());

        for (group, api) in apis {
            let list = with_cancel(cancel, async { Ok(api.list(&params).await?) }).await?;
            debug!(group = group.name(), count = list.items.len(), "Listed objects");
            groups.push(list.items.into_iter().map(Arc::new).collect());
        }

        Ok(merge_groups(groups))
    }
}
