//! traefik-dns-source: DNS endpoints from Traefik routing resources
//!
//! Reads IngressRoute, IngressRouteTCP and IngressRouteUDP objects and
//! produces the CNAME endpoints an external DNS controller should publish.

pub mod annotations;
pub mod config;
pub mod endpoint;
pub mod health;
pub mod lister;
pub mod matcher;
pub mod retry;
pub mod routes;
pub mod selector;
pub mod source;
pub mod synthesizer;

pub use config::SourceConfig;
pub use endpoint::{Endpoint, RecordType};
pub use lister::{ApiLister, ListError, ReflectorLister, RouteLister, SnapshotLister};
pub use routes::{RoutingKind, RoutingObject};
pub use selector::Selector;
pub use source::{Source, SourceError, TraefikSource};
