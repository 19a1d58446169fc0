//! Traefik routing resources
//!
//! Typed definitions for the `traefik.io/v1alpha1` IngressRoute, IngressRouteTCP
//! and IngressRouteUDP custom resources, and the kind-agnostic [`RoutingObject`]
//! snapshot the rest of the crate works on.
//!
//! Objects arrive from the cluster as [`DynamicObject`]s so the same code path
//! serves both the current `traefik.io` group and the legacy
//! `traefik.containo.us` group. Each object is decoded on its own; a malformed
//! object yields a [`DecodeError`] without affecting its neighbours.

use std::collections::BTreeMap;
use std::fmt;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::{self, MatchFunction};

/// Traefik CRD version served by both API groups
pub const VERSION: &str = "v1alpha1";

/// API group the routing CRDs are served under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiGroup {
    /// `traefik.io`, Traefik v2.10 and later
    Traefik,
    /// `traefik.containo.us`, deprecated since Traefik v2.10
    Legacy,
}

impl ApiGroup {
    /// Both groups, `traefik.io` first
    pub const ALL: [ApiGroup; 2] = [ApiGroup::Traefik, ApiGroup::Legacy];

    /// Group of an `apiVersion` such as `traefik.io/v1alpha1`
    pub fn from_api_version(api_version: &str) -> Option<Self> {
        let (group, _) = api_version.split_once('/')?;
        ApiGroup::ALL.into_iter().find(|g| g.name() == group)
    }

    pub fn name(self) -> &'static str {
        match self {
            ApiGroup::Traefik => "traefik.io",
            ApiGroup::Legacy => "traefik.containo.us",
        }
    }
}

/// The three routing object kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoutingKind {
    Http,
    Tcp,
    Udp,
}

impl RoutingKind {
    /// All kinds, in the order their endpoints are emitted
    pub const ALL: [RoutingKind; 3] = [RoutingKind::Http, RoutingKind::Tcp, RoutingKind::Udp];

    /// Kubernetes `kind` of the custom resource
    pub fn kind_name(self) -> &'static str {
        match self {
            RoutingKind::Http => "IngressRoute",
            RoutingKind::Tcp => "IngressRouteTCP",
            RoutingKind::Udp => "IngressRouteUDP",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(self) -> &'static str {
        match self {
            RoutingKind::Http => "ingressroutes",
            RoutingKind::Tcp => "ingressroutetcps",
            RoutingKind::Udp => "ingressrouteudps",
        }
    }

    /// Lowercase kind used as the first segment of the `resource` label
    pub fn label_name(self) -> &'static str {
        match self {
            RoutingKind::Http => "ingressroute",
            RoutingKind::Tcp => "ingressroutetcp",
            RoutingKind::Udp => "ingressrouteudp",
        }
    }

    /// Matchers whose arguments are hostnames for this kind.
    ///
    /// UDP routes carry no match expression, so the list is empty.
    pub fn match_functions(self) -> &'static [MatchFunction] {
        match self {
            RoutingKind::Http => &[MatchFunction::Host, MatchFunction::HostHeader],
            RoutingKind::Tcp => &[MatchFunction::HostSni],
            RoutingKind::Udp => &[],
        }
    }

    pub fn from_kind_name(kind: &str) -> Option<Self> {
        RoutingKind::ALL
            .into_iter()
            .find(|k| k.kind_name() == kind)
    }

    /// Dynamic API resource for this kind in the given group
    pub fn api_resource(self, group: ApiGroup) -> ApiResource {
        let gvk = GroupVersionKind::gvk(group.name(), VERSION, self.kind_name());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }
}

impl fmt::Display for RoutingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// IngressRoute route definition
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct IngressRouteRoute {
    /// Match expression (e.g., "Host(`example.com`) && PathPrefix(`/api`)")
    #[serde(rename = "match")]
    pub match_expr: String,
    /// Route kind (Rule, etc.)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// IngressRoute spec
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRoute",
    plural = "ingressroutes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    /// Entry points (e.g., ["web", "websecure"])
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Routes with match expressions
    #[serde(default)]
    pub routes: Vec<IngressRouteRoute>,
}

/// IngressRouteTCP route definition
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct IngressRouteTCPRoute {
    /// Match expression (e.g., "HostSNI(`db.example.com`)")
    #[serde(rename = "match")]
    pub match_expr: String,
}

/// IngressRouteTCP spec
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRouteTCP",
    plural = "ingressroutetcps",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteTCPSpec {
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub routes: Vec<IngressRouteTCPRoute>,
}

/// IngressRouteUDP spec
///
/// UDP routes have no match expression; only annotations name hosts.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRouteUDP",
    plural = "ingressrouteudps",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteUDPSpec {
    #[serde(default)]
    pub entry_points: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Expected kind {expected}, found {found}")]
    KindMismatch {
        expected: RoutingKind,
        found: String,
    },
    #[error("Invalid {kind} spec: {source}")]
    InvalidSpec {
        kind: RoutingKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A single route's match expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub match_expr: String,
}

/// Kind-agnostic snapshot of one routing object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingObject {
    pub kind: RoutingKind,
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub routes: Vec<Route>,
}

impl RoutingObject {
    /// Decode a dynamic object of the given kind.
    ///
    /// A missing `spec`, or a spec without `routes`, decodes to an object with
    /// no routes. UDP objects never carry routes.
    pub fn decode(kind: RoutingKind, obj: &DynamicObject) -> Result<Self, DecodeError> {
        if let Some(types) = &obj.types {
            if types.kind != kind.kind_name() {
                return Err(DecodeError::KindMismatch {
                    expected: kind,
                    found: types.kind.clone(),
                });
            }
        }

        let name = obj
            .metadata
            .name
            .clone()
            .ok_or(DecodeError::MissingField("metadata.name"))?;
        let namespace = obj
            .metadata
            .namespace
            .clone()
            .ok_or(DecodeError::MissingField("metadata.namespace"))?;
        let annotations = obj.metadata.annotations.clone().unwrap_or_default();

        let spec = obj.data.get("spec").filter(|s| !s.is_null()).cloned();
        let routes = match (kind, spec) {
            (RoutingKind::Udp, _) | (_, None) => Vec::new(),
            (RoutingKind::Http, Some(spec)) => serde_json::from_value::<IngressRouteSpec>(spec)
                .map_err(|source| DecodeError::InvalidSpec { kind, source })?
                .routes
                .into_iter()
                .map(|r| Route {
                    match_expr: r.match_expr,
                })
                .collect(),
            (RoutingKind::Tcp, Some(spec)) => serde_json::from_value::<IngressRouteTCPSpec>(spec)
                .map_err(|source| DecodeError::InvalidSpec { kind, source })?
                .routes
                .into_iter()
                .map(|r| Route {
                    match_expr: r.match_expr,
                })
                .collect(),
        };

        Ok(Self {
            kind,
            namespace,
            name,
            annotations,
            routes,
        })
    }

    /// `<kind>/<namespace>/<name>` with the lowercase kind
    pub fn resource_label(&self) -> String {
        format!("{}/{}/{}", self.kind.label_name(), self.namespace, self.name)
    }

    /// Hostnames referenced by this object's match expressions, in route order.
    ///
    /// A hostname repeated across routes is returned once.
    pub fn rule_hosts(&self) -> Vec<String> {
        let functions = self.kind.match_functions();
        let mut hosts: Vec<String> = Vec::new();

        for route in &self.routes {
            for host in matcher::extract_hosts(&route.match_expr, functions) {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }

        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).expect("test object should deserialize")
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RoutingKind::Http.kind_name(), "IngressRoute");
        assert_eq!(RoutingKind::Tcp.plural(), "ingressroutetcps");
        assert_eq!(RoutingKind::Udp.label_name(), "ingressrouteudp");
        assert_eq!(
            RoutingKind::from_kind_name("IngressRouteTCP"),
            Some(RoutingKind::Tcp)
        );
        assert_eq!(RoutingKind::from_kind_name("Ingress"), None);
    }

    #[test]
    fn test_api_group_from_api_version() {
        assert_eq!(
            ApiGroup::from_api_version("traefik.io/v1alpha1"),
            Some(ApiGroup::Traefik)
        );
        assert_eq!(
            ApiGroup::from_api_version("traefik.containo.us/v1alpha1"),
            Some(ApiGroup::Legacy)
        );
        assert_eq!(ApiGroup::from_api_version("v1"), None);
        assert_eq!(ApiGroup::from_api_version("networking.k8s.io/v1"), None);
    }

    #[test]
    fn test_api_resource_groups() {
        let ar = RoutingKind::Http.api_resource(ApiGroup::Traefik);
        assert_eq!(ar.api_version, "traefik.io/v1alpha1");
        assert_eq!(ar.plural, "ingressroutes");

        let ar = RoutingKind::Udp.api_resource(ApiGroup::Legacy);
        assert_eq!(ar.group, "traefik.containo.us");
        assert_eq!(ar.kind, "IngressRouteUDP");
    }

    #[test]
    fn test_decode_ingressroute() {
        let obj = dynamic(json!({
            "apiVersion": "traefik.io/v1alpha1",
            "kind": "IngressRoute",
            "metadata": {
                "name": "web",
                "namespace": "traefik",
                "annotations": {"external-dns.alpha.kubernetes.io/target": "lb.example.com"}
            },
            "spec": {
                "entryPoints": ["websecure"],
                "routes": [
                    {"match": "Host(`a.example.com`)", "kind": "Rule"},
                    {"match": "Host(`b.example.com`) || Host(`a.example.com`)", "kind": "Rule"}
                ]
            }
        }));

        let ir = RoutingObject::decode(RoutingKind::Http, &obj).expect("should decode");
        assert_eq!(ir.name, "web");
        assert_eq!(ir.namespace, "traefik");
        assert_eq!(ir.routes.len(), 2);
        assert_eq!(ir.rule_hosts(), vec!["a.example.com", "b.example.com"]);
        assert_eq!(ir.resource_label(), "ingressroute/traefik/web");
    }

    #[test]
    fn test_decode_without_spec() {
        let obj = dynamic(json!({
            "apiVersion": "traefik.io/v1alpha1",
            "kind": "IngressRouteTCP",
            "metadata": {"name": "db", "namespace": "data"}
        }));

        let tcp = RoutingObject::decode(RoutingKind::Tcp, &obj).expect("should decode");
        assert!(tcp.routes.is_empty());
        assert!(tcp.annotations.is_empty());
        assert_eq!(tcp.resource_label(), "ingressroutetcp/data/db");
    }

    #[test]
    fn test_decode_udp_ignores_spec() {
        let obj = dynamic(json!({
            "apiVersion": "traefik.io/v1alpha1",
            "kind": "IngressRouteUDP",
            "metadata": {"name": "dns", "namespace": "traefik"},
            "spec": {
                "entryPoints": ["udp"],
                "routes": [{"services": [{"name": "coredns", "port": 53}]}]
            }
        }));

        let udp = RoutingObject::decode(RoutingKind::Udp, &obj).expect("should decode");
        assert!(udp.routes.is_empty());
        assert!(udp.rule_hosts().is_empty());
    }

    #[test]
    fn test_decode_tcp_uses_host_sni_only() {
        let obj = dynamic(json!({
            "kind": "IngressRouteTCP",
            "apiVersion": "traefik.io/v1alpha1",
            "metadata": {"name": "db", "namespace": "data"},
            "spec": {"routes": [{"match": "HostSNI(`db.example.com`) || Host(`web.example.com`)"}]}
        }));

        let tcp = RoutingObject::decode(RoutingKind::Tcp, &obj).expect("should decode");
        assert_eq!(tcp.rule_hosts(), vec!["db.example.com"]);
    }

    #[test]
    fn test_decode_missing_name() {
        let obj = dynamic(json!({
            "kind": "IngressRoute",
            "apiVersion": "traefik.io/v1alpha1",
            "metadata": {"namespace": "traefik"}
        }));

        let err = RoutingObject::decode(RoutingKind::Http, &obj).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("metadata.name")));
    }

    #[test]
    fn test_decode_malformed_routes() {
        let obj = dynamic(json!({
            "kind": "IngressRoute",
            "apiVersion": "traefik.io/v1alpha1",
            "metadata": {"name": "broken", "namespace": "traefik"},
            "spec": {"routes": "Host(`a.example.com`)"}
        }));

        let err = RoutingObject::decode(RoutingKind::Http, &obj).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidSpec {
                kind: RoutingKind::Http,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_kind_mismatch() {
        let obj = dynamic(json!({
            "kind": "IngressRouteUDP",
            "apiVersion": "traefik.io/v1alpha1",
            "metadata": {"name": "x", "namespace": "traefik"}
        }));

        let err = RoutingObject::decode(RoutingKind::Http, &obj).unwrap_err();
        assert!(matches!(err, DecodeError::KindMismatch { .. }));
    }

    #[test]
    fn test_typed_resource_roundtrips_into_dynamic() {
        let mut ir = IngressRoute::new(
            "typed",
            IngressRouteSpec {
                entry_points: vec!["web".to_string()],
                routes: vec![IngressRouteRoute {
                    match_expr: "Host(`typed.example.com`)".to_string(),
                    kind: "Rule".to_string(),
                }],
            },
        );
        ir.metadata.namespace = Some("default".to_string());

        let obj: DynamicObject =
            serde_json::from_value(serde_json::to_value(&ir).expect("serialize"))
                .expect("deserialize");
        let decoded = RoutingObject::decode(RoutingKind::Http, &obj).expect("should decode");
        assert_eq!(decoded.rule_hosts(), vec!["typed.example.com"]);
    }
}
