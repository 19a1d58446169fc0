//! DNS endpoint records
//!
//! An [`Endpoint`] is the intent to publish one DNS name pointing at a set of
//! targets. Field names serialize the way external-dns spells them so the
//! output can be consumed by tooling that already understands that format.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label carrying the `<kind>/<namespace>/<name>` identity of the source object
pub const RESOURCE_LABEL: &str = "resource";

/// Labels attached to an endpoint
pub type Labels = BTreeMap<String, String>;

/// DNS record type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "CNAME")]
    Cname,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific key/value pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpecificProperty {
    pub name: String,
    pub value: String,
}

/// A DNS record intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub dns_name: String,
    pub targets: Vec<String>,
    pub record_type: RecordType,
    /// Zero means no TTL was requested
    #[serde(rename = "recordTTL", default)]
    pub record_ttl: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_identifier: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub provider_specific: Vec<ProviderSpecificProperty>,
}

impl Endpoint {
    pub fn new(
        dns_name: impl Into<String>,
        record_type: RecordType,
        record_ttl: i64,
        targets: Vec<String>,
    ) -> Self {
        Self {
            dns_name: dns_name.into(),
            targets,
            record_type,
            record_ttl,
            set_identifier: None,
            labels: Labels::new(),
            provider_specific: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_set_identifier(mut self, set_identifier: Option<String>) -> Self {
        self.set_identifier = set_identifier;
        self
    }

    /// The `resource` label, if set
    pub fn resource(&self) -> Option<&str> {
        self.labels.get(RESOURCE_LABEL).map(String::as_str)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {} [{}]",
            self.dns_name,
            self.record_ttl,
            self.record_type,
            self.set_identifier.as_deref().unwrap_or(""),
            self.targets.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Endpoint {
        Endpoint::new(
            "a.example.com",
            RecordType::Cname,
            0,
            vec!["target.domain.tld".to_string()],
        )
        .with_label(RESOURCE_LABEL, "ingressroute/traefik/web")
    }

    #[test]
    fn test_resource_label() {
        let ep = sample();
        assert_eq!(ep.resource(), Some("ingressroute/traefik/web"));
        assert!(ep.provider_specific.is_empty());
    }

    #[test]
    fn test_serialize_field_names() {
        let value = serde_json::to_value(sample()).expect("endpoint should serialize");
        assert_eq!(value["dnsName"], "a.example.com");
        assert_eq!(value["recordType"], "CNAME");
        assert_eq!(value["recordTTL"], 0);
        assert_eq!(value["targets"][0], "target.domain.tld");
        assert_eq!(value["labels"]["resource"], "ingressroute/traefik/web");
        assert!(value.get("setIdentifier").is_none());
    }

    #[test]
    fn test_deserialize_defaults() {
        let ep: Endpoint = serde_json::from_str(
            r#"{"dnsName":"b.example.com","targets":["lb"],"recordType":"AAAA"}"#,
        )
        .expect("endpoint should deserialize");
        assert_eq!(ep.record_type, RecordType::Aaaa);
        assert_eq!(ep.record_ttl, 0);
        assert!(ep.labels.is_empty());
    }

    #[test]
    fn test_display() {
        let ep = sample().with_set_identifier(Some("blue".to_string()));
        assert_eq!(
            ep.to_string(),
            "a.example.com 0 IN CNAME blue [target.domain.tld]"
        );
    }
}
