//! In-memory lister over fixed objects and manifest files

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{merge_groups, sort_objects, ListError, RouteLister};
use crate::routes::{ApiGroup, RoutingKind};

/// Namespace given to manifests that do not set one
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not a Traefik routing kind: {0:?}")]
    UnsupportedKind(String),
    #[error("Not a Traefik API group: {0:?}")]
    UnsupportedGroup(String),
    #[error("API group {0} is disabled")]
    DisabledGroup(&'static str),
}

/// In-memory lister over a fixed set of objects.
///
/// Used for tests and for rendering endpoints from manifest files without a
/// cluster. Objects may be added or replaced while the lister is shared.
/// Objects are kept per API group and listed like the cluster listers: earlier
/// groups first, later-group duplicates of a namespace/name dropped.
pub struct SnapshotLister {
    namespace: String,
    groups: Vec<ApiGroup>,
    objects: RwLock<HashMap<(RoutingKind, ApiGroup), Vec<Arc<DynamicObject>>>>,
}

impl Default for SnapshotLister {
    fn default() -> Self {
        Self::new("")
    }
}

impl SnapshotLister {
    /// Create an empty lister scoped to `namespace` (empty for all namespaces)
    /// accepting both API groups
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_groups(namespace, &ApiGroup::ALL)
    }

    /// Create an empty lister accepting only `groups`, earlier groups winning
    pub fn with_groups(namespace: impl Into<String>, groups: &[ApiGroup]) -> Self {
        Self {
            namespace: namespace.into(),
            groups: groups.to_vec(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Kind and API group of an object, if this lister accepts it
    fn classify(&self, obj: &DynamicObject) -> Result<(RoutingKind, ApiGroup), ManifestError> {
        let (api_version, kind_name) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.as_str(), t.kind.as_str()))
            .unwrap_or(("", ""));

        let kind = RoutingKind::from_kind_name(kind_name)
            .ok_or_else(|| ManifestError::UnsupportedKind(kind_name.to_string()))?;
        let group = ApiGroup::from_api_version(api_version)
            .ok_or_else(|| ManifestError::UnsupportedGroup(api_version.to_string()))?;
        if !self.groups.contains(&group) {
            return Err(ManifestError::DisabledGroup(group.name()));
        }

        Ok((kind, group))
    }

    /// Add an object, replacing any object of the same kind, group, namespace and name
    pub fn insert(&self, obj: DynamicObject) -> Result<RoutingKind, ManifestError> {
        let (kind, group) = self.classify(&obj)?;

        let mut objects = self.objects.write();
        let entries = objects.entry((kind, group)).or_default();
        entries.retain(|o| {
            o.metadata.namespace != obj.metadata.namespace || o.metadata.name != obj.metadata.name
        });
        entries.push(Arc::new(obj));

        Ok(kind)
    }

    /// Add a typed resource such as an [`IngressRoute`](crate::routes::IngressRoute)
    pub fn insert_resource<K: Serialize>(
        &self,
        resource: &K,
    ) -> Result<RoutingKind, ManifestError> {
        let obj: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
        self.insert(obj)
    }

    /// Remove an object from every group; returns whether it was present
    pub fn remove(&self, kind: RoutingKind, namespace: &str, name: &str) -> bool {
        let mut removed = false;
        let mut objects = self.objects.write();

        for group in ApiGroup::ALL {
            let Some(entries) = objects.get_mut(&(kind, group)) else {
                continue;
            };
            let before = entries.len();
            entries.retain(|o| {
                o.metadata.namespace.as_deref() != Some(namespace)
                    || o.metadata.name.as_deref() != Some(name)
            });
            removed |= entries.len() != before;
        }

        removed
    }

    /// Swap all objects of `kind` at once.
    ///
    /// Objects of another kind or of a group this lister does not accept are
    /// dropped.
    pub fn replace(&self, kind: RoutingKind, objects: Vec<DynamicObject>) {
        let mut by_group: HashMap<ApiGroup, Vec<Arc<DynamicObject>>> = HashMap::new();

        for obj in objects {
            match self.classify(&obj) {
                Ok((k, group)) if k == kind => {
                    by_group.entry(group).or_default().push(Arc::new(obj))
                }
                _ => debug!(
                    kind = %kind,
                    name = obj.metadata.name.as_deref().unwrap_or_default(),
                    "Dropping object from replacement"
                ),
            }
        }

        let mut stored = self.objects.write();
        for group in ApiGroup::ALL {
            stored.insert((kind, group), by_group.remove(&group).unwrap_or_default());
        }
    }

    /// Load every Traefik routing object from a multi-document YAML stream.
    ///
    /// Documents of other kinds, other API groups or disabled API groups are
    /// skipped. Returns the number of objects loaded.
    pub fn load_manifests(&self, yaml: &str) -> Result<usize, ManifestError> {
        let mut loaded = 0;

        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }

            let mut obj: DynamicObject = serde_json::from_value(serde_json::to_value(&value)?)?;

            if let Err(e) = self.classify(&obj) {
                debug!(error = %e, "Skipping manifest");
                continue;
            }

            if obj.metadata.namespace.is_none() {
                obj.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
            }

            self.insert(obj)?;
            loaded += 1;
        }

        Ok(loaded)
    }
}

#[async_trait]
impl RouteLister for SnapshotLister {
    async fn list(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<DynamicObject>>, ListError> {
        if cancel.is_cancelled() {
            return Err(ListError::Cancelled);
        }

        let stored = self.objects.read();
        let groups = self
            .groups
            .iter()
            .map(|&group| {
                let mut objects: Vec<_> = stored
                    .get(&(kind, group))
                    .into_iter()
                    .flatten()
                    .filter(|o| {
                        self.namespace.is_empty()
                            || o.metadata.namespace.as_deref() == Some(self.namespace.as_str())
                    })
                    .cloned()
                    .collect();
                sort_objects(&mut objects);
                objects
            })
            .collect();

        Ok(merge_groups(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{IngressRoute, IngressRouteRoute, IngressRouteSpec};

    const MANIFESTS: &str = r#"
apiVersion: traefik.io/v1alpha1
kind: IngressRoute
metadata:
  name: web
  namespace: traefik
spec:
  routes:
    - match: Host(`a.example.com`)
      kind: Rule
---
apiVersion: v1
kind: Service
metadata:
  name: web
---
apiVersion: traefik.containo.us/v1alpha1
kind: IngressRouteTCP
metadata:
  name: db
spec:
  routes:
    - match: HostSNI(`db.example.com`)
---
"#;

    fn names(objects: &[Arc<DynamicObject>]) -> Vec<String> {
        objects
            .iter()
            .map(|o| {
                format!(
                    "{}/{}",
                    o.metadata.namespace.clone().unwrap_or_default(),
                    o.metadata.name.clone().unwrap_or_default()
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_load_manifests_skips_other_kinds() {
        let lister = SnapshotLister::new("");
        let loaded = lister.load_manifests(MANIFESTS).expect("manifests should load");
        assert_eq!(loaded, 2);

        let cancel = CancellationToken::new();
        let http = lister.list(RoutingKind::Http, &cancel).await.unwrap();
        assert_eq!(names(&http), vec!["traefik/web"]);

        let tcp = lister.list(RoutingKind::Tcp, &cancel).await.unwrap();
        assert_eq!(names(&tcp), vec!["default/db"]);

        assert!(lister.list(RoutingKind::Udp, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_scope() {
        let lister = SnapshotLister::new("traefik");
        lister.load_manifests(MANIFESTS).expect("manifests should load");

        let cancel = CancellationToken::new();
        assert_eq!(lister.list(RoutingKind::Http, &cancel).await.unwrap().len(), 1);
        assert!(lister.list(RoutingKind::Tcp, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_replaces_and_remove() {
        let lister = SnapshotLister::new("");
        let mut ir = IngressRoute::new(
            "web",
            IngressRouteSpec {
                entry_points: vec![],
                routes: vec![IngressRouteRoute {
                    match_expr: "Host(`a.example.com`)".to_string(),
                    kind: "Rule".to_string(),
                }],
            },
        );
        ir.metadata.namespace = Some("traefik".to_string());

        assert_eq!(lister.insert_resource(&ir).unwrap(), RoutingKind::Http);
        ir.spec.routes[0].match_expr = "Host(`b.example.com`)".to_string();
        lister.insert_resource(&ir).unwrap();

        let cancel = CancellationToken::new();
        let listed = lister.list(RoutingKind::Http, &cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].data["spec"]["routes"][0]["match"],
            "Host(`b.example.com`)"
        );

        assert!(lister.remove(RoutingKind::Http, "traefik", "web"));
        assert!(!lister.remove(RoutingKind::Http, "traefik", "web"));
        assert!(lister.list(RoutingKind::Http, &cancel).await.unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_unknown_kind() {
        let lister = SnapshotLister::new("");
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "x", "namespace": "default"}
        }))
        .unwrap();

        assert!(matches!(
            lister.insert(obj),
            Err(ManifestError::UnsupportedKind(kind)) if kind == "ConfigMap"
        ));
    }

    const SAME_NAME_BOTH_GROUPS: &str = r#"
apiVersion: traefik.containo.us/v1alpha1
kind: IngressRoute
metadata:
  name: web
  namespace: traefik
spec:
  routes:
    - match: Host(`legacy.example.com`)
---
apiVersion: traefik.io/v1alpha1
kind: IngressRoute
metadata:
  name: web
  namespace: traefik
spec:
  routes:
    - match: Host(`new.example.com`)
---
apiVersion: traefik.containo.us/v1alpha1
kind: IngressRoute
metadata:
  name: old-only
  namespace: traefik
spec:
  routes:
    - match: Host(`old.example.com`)
"#;

    fn first_match(obj: &DynamicObject) -> String {
        obj.data["spec"]["routes"][0]["match"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_traefik_io_wins_over_legacy_duplicate() {
        let lister = SnapshotLister::new("");
        assert_eq!(lister.load_manifests(SAME_NAME_BOTH_GROUPS).unwrap(), 3);

        // Loading the legacy copy again must not displace the traefik.io object
        lister
            .load_manifests(SAME_NAME_BOTH_GROUPS.split("---").next().unwrap())
            .unwrap();

        let cancel = CancellationToken::new();
        let listed = lister.list(RoutingKind::Http, &cancel).await.unwrap();
        let matches: Vec<_> = listed.iter().map(|o| first_match(o)).collect();
        assert_eq!(
            matches,
            vec!["Host(`new.example.com`)", "Host(`old.example.com`)"]
        );
    }

    #[tokio::test]
    async fn test_disabled_groups_are_skipped() {
        let cancel = CancellationToken::new();

        let new_only = SnapshotLister::with_groups("", &[ApiGroup::Traefik]);
        assert_eq!(new_only.load_manifests(SAME_NAME_BOTH_GROUPS).unwrap(), 1);
        let listed = new_only.list(RoutingKind::Http, &cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(first_match(&listed[0]), "Host(`new.example.com`)");

        let legacy_only = SnapshotLister::with_groups("", &[ApiGroup::Legacy]);
        assert_eq!(legacy_only.load_manifests(SAME_NAME_BOTH_GROUPS).unwrap(), 2);
        let listed = legacy_only.list(RoutingKind::Http, &cancel).await.unwrap();
        let matches: Vec<_> = listed.iter().map(|o| first_match(o)).collect();
        assert_eq!(
            matches,
            vec!["Host(`old.example.com`)", "Host(`legacy.example.com`)"]
        );
    }

    #[test]
    fn test_insert_rejects_disabled_group() {
        let lister = SnapshotLister::with_groups("", &[ApiGroup::Legacy]);
        let ir = IngressRoute::new("web", IngressRouteSpec::default());

        assert!(matches!(
            lister.insert_resource(&ir),
            Err(ManifestError::DisabledGroup("traefik.io"))
        ));
    }

    #[tokio::test]
    async fn test_replace_swaps_objects_per_group() {
        let lister = SnapshotLister::new("");
        lister.load_manifests(SAME_NAME_BOTH_GROUPS).unwrap();

        let replacement: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "traefik.containo.us/v1alpha1",
            "kind": "IngressRoute",
            "metadata": {"name": "fresh", "namespace": "traefik"}
        }))
        .unwrap();
        lister.replace(RoutingKind::Http, vec![replacement]);

        let cancel = CancellationToken::new();
        let listed = lister.list(RoutingKind::Http, &cancel).await.unwrap();
        assert_eq!(names(&listed), vec!["traefik/fresh"]);
    }

    #[tokio::test]
    async fn test_list_cancelled() {
        let lister = SnapshotLister::new("");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            lister.list(RoutingKind::Http, &cancel).await,
            Err(ListError::Cancelled)
        ));
    }
}
