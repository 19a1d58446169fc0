//! Source configuration and annotation keys

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routes::ApiGroup;
use crate::selector::{Selector, SelectorError};

/// Annotations read from routing objects
pub mod annotations {
    /// Hostname override (comma-separated)
    pub const HOSTNAME: &str = "external-dns.alpha.kubernetes.io/hostname";
    /// Target the DNS names point at
    pub const TARGET: &str = "external-dns.alpha.kubernetes.io/target";
    /// Record TTL (seconds, or a duration such as `5m`)
    pub const TTL: &str = "external-dns.alpha.kubernetes.io/ttl";
    /// Set identifier for weighted/geo routing policies
    pub const SET_IDENTIFIER: &str = "external-dns.alpha.kubernetes.io/set-identifier";
    /// Controller that owns the object
    pub const CONTROLLER: &str = "external-dns.alpha.kubernetes.io/controller";
    /// Only objects without a controller annotation or with this value are processed
    pub const CONTROLLER_VALUE: &str = "dns-controller";
}

/// Environment variables consulted by [`SourceConfig::load`]
pub mod env {
    pub const NAMESPACE: &str = "TRAEFIK_DNS_NAMESPACE";
    pub const ANNOTATION_FILTER: &str = "TRAEFIK_DNS_ANNOTATION_FILTER";
    pub const IGNORE_HOSTNAME_ANNOTATION: &str = "TRAEFIK_DNS_IGNORE_HOSTNAME_ANNOTATION";
    pub const DISABLE_LEGACY: &str = "TRAEFIK_DNS_DISABLE_LEGACY";
    pub const DISABLE_NEW: &str = "TRAEFIK_DNS_DISABLE_NEW";
    pub const RESYNC_INTERVAL: &str = "TRAEFIK_DNS_RESYNC_INTERVAL_SECONDS";
    pub const HEALTH_PORT: &str = "TRAEFIK_DNS_HEALTH_PORT";
    pub const SYNC_TIMEOUT: &str = "TRAEFIK_DNS_SYNC_TIMEOUT_SECONDS";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid annotation filter: {0}")]
    InvalidFilter(#[from] SelectorError),

    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Both traefik.io and traefik.containo.us API groups are disabled")]
    NoApiGroups,
}

/// Configuration for the Traefik endpoint source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    /// Namespace to watch; empty means all namespaces
    pub namespace: String,
    /// Label-selector expression evaluated against object annotations
    pub annotation_filter: String,
    /// Ignore the hostname annotation and use only match expressions
    pub ignore_hostname_annotation: bool,
    /// Skip the legacy `traefik.containo.us` API group
    pub disable_legacy: bool,
    /// Skip the `traefik.io` API group
    pub disable_new: bool,
    /// Seconds between endpoint computations in watch mode
    pub resync_interval_seconds: u64,
    /// Port for the health probe server
    pub health_port: u16,
    /// Seconds to wait for the watch caches' initial listing
    pub sync_timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            annotation_filter: String::new(),
            ignore_hostname_annotation: false,
            disable_legacy: false,
            disable_new: false,
            resync_interval_seconds: default_resync_interval(),
            health_port: default_health_port(),
            sync_timeout_seconds: default_sync_timeout(),
        }
    }
}

fn default_resync_interval() -> u64 {
    60
}

fn default_health_port() -> u16 {
    8081
}

fn default_sync_timeout() -> u64 {
    120
}

/// Values given on the command line; `None` leaves the lower layers in place
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub namespace: Option<String>,
    pub annotation_filter: Option<String>,
    pub ignore_hostname_annotation: Option<bool>,
    pub disable_legacy: Option<bool>,
    pub disable_new: Option<bool>,
    pub resync_interval_seconds: Option<u64>,
    pub health_port: Option<u16>,
    pub sync_timeout_seconds: Option<u64>,
}

impl SourceConfig {
    /// Load configuration with precedence: CLI > env > file > defaults
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env::NAMESPACE) {
            self.namespace = v;
        }
        if let Some(v) = lookup(env::ANNOTATION_FILTER) {
            self.annotation_filter = v;
        }
        if let Some(v) = lookup(env::IGNORE_HOSTNAME_ANNOTATION) {
            self.ignore_hostname_annotation = parse_env(env::IGNORE_HOSTNAME_ANNOTATION, v)?;
        }
        if let Some(v) = lookup(env::DISABLE_LEGACY) {
            self.disable_legacy = parse_env(env::DISABLE_LEGACY, v)?;
        }
        if let Some(v) = lookup(env::DISABLE_NEW) {
            self.disable_new = parse_env(env::DISABLE_NEW, v)?;
        }
        if let Some(v) = lookup(env::RESYNC_INTERVAL) {
            self.resync_interval_seconds = parse_env(env::RESYNC_INTERVAL, v)?;
        }
        if let Some(v) = lookup(env::HEALTH_PORT) {
            self.health_port = parse_env(env::HEALTH_PORT, v)?;
        }
        if let Some(v) = lookup(env::SYNC_TIMEOUT) {
            self.sync_timeout_seconds = parse_env(env::SYNC_TIMEOUT, v)?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = &overrides.namespace {
            self.namespace.clone_from(v);
        }
        if let Some(v) = &overrides.annotation_filter {
            self.annotation_filter.clone_from(v);
        }
        if let Some(v) = overrides.ignore_hostname_annotation {
            self.ignore_hostname_annotation = v;
        }
        if let Some(v) = overrides.disable_legacy {
            self.disable_legacy = v;
        }
        if let Some(v) = overrides.disable_new {
            self.disable_new = v;
        }
        if let Some(v) = overrides.resync_interval_seconds {
            self.resync_interval_seconds = v;
        }
        if let Some(v) = overrides.health_port {
            self.health_port = v;
        }
        if let Some(v) = overrides.sync_timeout_seconds {
            self.sync_timeout_seconds = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.disable_legacy && self.disable_new {
            return Err(ConfigError::NoApiGroups);
        }
        if self.resync_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "resyncIntervalSeconds",
                value: "0".to_string(),
            });
        }
        if self.sync_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "syncTimeoutSeconds",
                value: "0".to_string(),
            });
        }
        self.selector()?;
        Ok(())
    }

    /// Parsed annotation filter
    pub fn selector(&self) -> Result<Selector, SelectorError> {
        self.annotation_filter.parse()
    }

    /// API groups to list, `traefik.io` first
    pub fn api_groups(&self) -> Vec<ApiGroup> {
        let mut groups = Vec::with_capacity(2);
        if !self.disable_new {
            groups.push(ApiGroup::Traefik);
        }
        if !self.disable_legacy {
            groups.push(ApiGroup::Legacy);
        }
        groups
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}
