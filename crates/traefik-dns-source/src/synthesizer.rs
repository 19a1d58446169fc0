//! Endpoint synthesis
//!
//! Combines annotation hostnames and rule-derived hostnames of one routing
//! object into CNAME endpoints. Annotation hostnames come first, in declared
//! order, followed by rule hostnames in route order; a hostname present in both
//! is emitted once, at its first position.

use std::collections::HashSet;

use crate::annotations::{self, ResolvedAnnotations};
use crate::endpoint::{Endpoint, RecordType, RESOURCE_LABEL};
use crate::matcher::WILDCARD;
use crate::routes::RoutingObject;

/// Ordered union of annotation and rule hostnames
pub fn merge_hostnames(annotation_hosts: &[String], rule_hosts: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();

    for host in annotation_hosts.iter().chain(rule_hosts) {
        if host.is_empty() || host == WILDCARD {
            continue;
        }
        if seen.insert(host) {
            merged.push(host.clone());
        }
    }

    merged
}

/// Build the endpoints for one object from already-resolved inputs.
///
/// Returns nothing when there is no target or no hostname.
pub fn synthesize(
    object: &RoutingObject,
    resolved: &ResolvedAnnotations,
    rule_hosts: &[String],
) -> Vec<Endpoint> {
    let Some(target) = resolved.target.as_ref() else {
        return Vec::new();
    };

    let resource = object.resource_label();

    merge_hostnames(&resolved.hostnames, rule_hosts)
        .into_iter()
        .map(|hostname| {
            Endpoint::new(hostname, RecordType::Cname, resolved.ttl, vec![target.clone()])
                .with_set_identifier(resolved.set_identifier.clone())
                .with_label(RESOURCE_LABEL, resource.clone())
        })
        .collect()
}

/// Resolve annotations, parse match expressions and synthesize endpoints
pub fn endpoints_for(object: &RoutingObject, ignore_hostname_annotation: bool) -> Vec<Endpoint> {
    let resolved = annotations::resolve(&object.annotations, ignore_hostname_annotation);
    synthesize(object, &resolved, &object.rule_hosts())
}
