//! Endpoint source over Traefik routing objects
//!
//! [`TraefikSource`] lists IngressRoute, IngressRouteTCP and IngressRouteUDP
//! objects concurrently, filters them and synthesizes endpoints. Output is
//! ordered by kind (HTTP, TCP, UDP), then by listing order, then by each
//! object's hostname order.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::annotations;
use crate::config::{ConfigError, SourceConfig};
use crate::endpoint::Endpoint;
use crate::lister::{ListError, RouteLister};
use crate::routes::{RoutingKind, RoutingObject};
use crate::selector::Selector;
use crate::synthesizer::endpoints_for;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to list {kind} objects: {source}")]
    List {
        kind: RoutingKind,
        #[source]
        source: ListError,
    },
}

impl SourceError {
    /// Whether the pass was aborted by cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SourceError::List {
                source: ListError::Cancelled,
                ..
            }
        )
    }
}

/// Produces the desired DNS endpoints
#[async_trait]
pub trait Source: Send + Sync {
    async fn endpoints(&self, cancel: &CancellationToken) -> Result<Vec<Endpoint>, SourceError>;
}

pub struct TraefikSource<L> {
    lister: L,
    selector: Selector,
    ignore_hostname_annotation: bool,
}

impl<L: RouteLister> TraefikSource<L> {
    pub fn new(lister: L, selector: Selector, ignore_hostname_annotation: bool) -> Self {
        Self {
            lister,
            selector,
            ignore_hostname_annotation,
        }
    }

    /// Build a source from configuration, rejecting an invalid annotation filter
    pub fn from_config(lister: L, config: &SourceConfig) -> Result<Self, ConfigError> {
        let selector = config.selector()?;
        Ok(Self::new(lister, selector, config.ignore_hostname_annotation))
    }

    pub fn lister(&self) -> &L {
        &self.lister
    }

    #[instrument(skip(self, cancel), fields(kind = %kind))]
    async fn endpoints_for_kind(
        &self,
        kind: RoutingKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Endpoint>, SourceError> {
        let objects = self
            .lister
            .list(kind, cancel)
            .await
            .map_err(|source| SourceError::List { kind, source })?;

        let mut endpoints = Vec::new();

        for raw in &objects {
            let object = match RoutingObject::decode(kind, raw) {
                Ok(object) => object,
                Err(e) => {
                    warn!(
                        namespace = raw.metadata.namespace.as_deref().unwrap_or_default(),
                        name = raw.metadata.name.as_deref().unwrap_or_default(),
                        error = %e,
                        "Skipping object that failed to decode"
                    );
                    continue;
                }
            };

            if !self.selector.matches(&object.annotations) {
                debug!(
                    resource = %object.resource_label(),
                    "Skipping object not matching annotation filter"
                );
                continue;
            }

            if !annotations::is_controlled_by_us(&object.annotations) {
                debug!(
                    resource = %object.resource_label(),
                    "Skipping object owned by another controller"
                );
                continue;
            }

            let produced = endpoints_for(&object, self.ignore_hostname_annotation);
            if produced.is_empty() {
                debug!(resource = %object.resource_label(), "No endpoints for object");
            }
            endpoints.extend(produced);
        }

        debug!(count = endpoints.len(), "Computed endpoints");
        Ok(endpoints)
    }
}

#[async_trait]
impl<L: RouteLister> Source for TraefikSource<L> {
    #[instrument(skip_all)]
    async fn endpoints(&self, cancel: &CancellationToken) -> Result<Vec<Endpoint>, SourceError> {
        let (http, tcp, udp) = tokio::try_join!(
            self.endpoints_for_kind(RoutingKind::Http, cancel),
            self.endpoints_for_kind(RoutingKind::Tcp, cancel),
            self.endpoints_for_kind(RoutingKind::Udp, cancel),
        )?;

        let mut endpoints = Vec::with_capacity(http.len() + tcp.len() + udp.len());
        endpoints.extend(http);
        endpoints.extend(tcp);
        endpoints.extend(udp);
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::annotations as keys;
    use crate::lister::MockRouteLister;
    use kube::api::DynamicObject;
    use serde_json::json;
    use std::sync::Arc;

    fn raw(
        kind: RoutingKind,
        name: &str,
        annots: serde_json::Value,
        spec: serde_json::Value,
    ) -> Arc<DynamicObject> {
        Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "traefik.io/v1alpha1",
                "kind": kind.kind_name(),
                "metadata": {"name": name, "namespace": "traefik", "annotations": annots},
                "spec": spec,
            }))
            .expect("test object should deserialize"),
        )
    }

    fn lister_with(
        http: Vec<Arc<DynamicObject>>,
        tcp: Vec<Arc<DynamicObject>>,
        udp: Vec<Arc<DynamicObject>>,
    ) -> MockRouteLister {
        let mut lister = MockRouteLister::new();
        lister.expect_list().returning(move |kind, _| {
            Ok(match kind {
                RoutingKind::Http => http.clone(),
                RoutingKind::Tcp => tcp.clone(),
                RoutingKind::Udp => udp.clone(),
            })
        });
        lister
    }

    #[tokio::test]
    async fn test_kind_order_http_tcp_udp() {
        let target = json!({ (keys::TARGET): "target.domain.tld" });
        let lister = lister_with(
            vec![raw(
                RoutingKind::Http,
                "web",
                target.clone(),
                json!({"routes": [{"match": "Host(`a.example.com`)"}]}),
            )],
            vec![raw(
                RoutingKind::Tcp,
                "db",
                target.clone(),
                json!({"routes": [{"match": "HostSNI(`b.example.com`)"}]}),
            )],
            vec![raw(
                RoutingKind::Udp,
                "dns",
                json!({ (keys::TARGET): "target.domain.tld", (keys::HOSTNAME): "c.example.com" }),
                json!({}),
            )],
        );

        let source = TraefikSource::new(lister, Selector::everything(), false);
        let endpoints = source
            .endpoints(&CancellationToken::new())
            .await
            .expect("endpoints should compute");

        let resources: Vec<_> = endpoints.iter().filter_map(|e| e.resource()).collect();
        assert_eq!(
            resources,
            vec![
                "ingressroute/traefik/web",
                "ingressroutetcp/traefik/db",
                "ingressrouteudp/traefik/dns"
            ]
        );
    }

    #[tokio::test]
    async fn test_list_error_propagates_without_partial_results() {
        let mut lister = MockRouteLister::new();
        lister.expect_list().returning(|kind, _| match kind {
            RoutingKind::Tcp => Err(ListError::CacheClosed(RoutingKind::Tcp)),
            _ => Ok(Vec::new()),
        });

        let source = TraefikSource::new(lister, Selector::everything(), false);
        let err = source
            .endpoints(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SourceError::List {
                kind: RoutingKind::Tcp,
                source: ListError::CacheClosed(_)
            }
        ));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_as_list_error() {
        let mut lister = MockRouteLister::new();
        lister
            .expect_list()
            .returning(|_, cancel| {
                if cancel.is_cancelled() {
                    Err(ListError::Cancelled)
                } else {
                    Ok(Vec::new())
                }
            });

        let source = TraefikSource::new(lister, Selector::everything(), false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = source.endpoints(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_undecodable_object_is_skipped() {
        let target = json!({ (keys::TARGET): "target.domain.tld" });
        let lister = lister_with(
            vec![
                raw(RoutingKind::Http, "broken", target.clone(), json!({"routes": "nope"})),
                raw(
                    RoutingKind::Http,
                    "ok",
                    target,
                    json!({"routes": [{"match": "Host(`ok.example.com`)"}]}),
                ),
            ],
            vec![],
            vec![],
        );

        let source = TraefikSource::new(lister, Selector::everything(), false);
        let endpoints = source.endpoints(&CancellationToken::new()).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].dns_name, "ok.example.com");
    }

    #[tokio::test]
    async fn test_selector_and_controller_filtering() {
        let lister = lister_with(
            vec![
                raw(
                    RoutingKind::Http,
                    "public",
                    json!({
                        (keys::TARGET): "lb.example.com",
                        "kubernetes.io/ingress.class": "traefik"
                    }),
                    json!({"routes": [{"match": "Host(`public.example.com`)"}]}),
                ),
                raw(
                    RoutingKind::Http,
                    "internal",
                    json!({
                        (keys::TARGET): "lb.example.com",
                        "kubernetes.io/ingress.class": "nginx"
                    }),
                    json!({"routes": [{"match": "Host(`internal.example.com`)"}]}),
                ),
                raw(
                    RoutingKind::Http,
                    "foreign",
                    json!({
                        (keys::TARGET): "lb.example.com",
                        "kubernetes.io/ingress.class": "traefik",
                        (keys::CONTROLLER): "someone-else"
                    }),
                    json!({"routes": [{"match": "Host(`foreign.example.com`)"}]}),
                ),
            ],
            vec![],
            vec![],
        );

        let config = SourceConfig {
            annotation_filter: "kubernetes.io/ingress.class=traefik".to_string(),
            ..Default::default()
        };
        let source = TraefikSource::from_config(lister, &config).expect("valid config");
        let endpoints = source.endpoints(&CancellationToken::new()).await.unwrap();

        let names: Vec<_> = endpoints.iter().map(|e| e.dns_name.as_str()).collect();
        assert_eq!(names, vec!["public.example.com"]);
    }

    #[test]
    fn test_from_config_rejects_invalid_filter() {
        let config = SourceConfig {
            annotation_filter: "=broken".to_string(),
            ..Default::default()
        };
        let result = TraefikSource::from_config(MockRouteLister::new(), &config);
        assert!(matches!(result, Err(ConfigError::InvalidFilter(_))));
    }
}
