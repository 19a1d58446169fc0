//! Traefik match expression parser
//!
//! Extracts hostnames from Traefik match expressions like:
//! - `Host(`foo.example.com`)`
//! - `Host(`a.com`) || Host(`b.com`)`
//! - `Host(`a.com`, `b.com`)`
//! - `HostSNI(`db.example.com`)`
//!
//! Rule logic is flattened: every host referenced by a recognized matcher is
//! returned, whether it sits behind `||`, `&&` or inside parentheses. An
//! expression like `Host(`a.com`) && PathPrefix(`/x`)` therefore yields
//! `a.com`. This is a simplification, not an evaluation of the rule.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Wildcard argument accepted by Traefik but never usable as a DNS name
pub const WILDCARD: &str = "*";

static MATCHER_CALL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(HostSNI|HostHeader|Host)\s*\(([^)]*)\)").expect("valid regex")
});

static QUOTED_ARG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("valid regex"));

/// Matcher functions that carry hostnames
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchFunction {
    /// HTTP `Host(...)`
    Host,
    /// HTTP `HostHeader(...)`, an alias of `Host` in Traefik v2
    HostHeader,
    /// TCP `HostSNI(...)`
    HostSni,
}

impl MatchFunction {
    /// Function name as written in a match expression
    pub fn name(self) -> &'static str {
        match self {
            MatchFunction::Host => "Host",
            MatchFunction::HostHeader => "HostHeader",
            MatchFunction::HostSni => "HostSNI",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Host" => Some(MatchFunction::Host),
            "HostHeader" => Some(MatchFunction::HostHeader),
            "HostSNI" => Some(MatchFunction::HostSni),
            _ => None,
        }
    }
}

impl fmt::Display for MatchFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extract all hostnames from a Traefik match expression.
///
/// Only calls to one of `functions` contribute. Arguments equal to `*` and
/// blank arguments are dropped, and a hostname repeated within the expression
/// is returned once, at its first position.
///
/// An expression without any recognized call yields an empty list.
pub fn extract_hosts(match_expr: &str, functions: &[MatchFunction]) -> Vec<String> {
    let mut hosts = Vec::new();
    let mut seen = HashSet::new();

    for cap in MATCHER_CALL_REGEX.captures_iter(match_expr) {
        let Some(function) = cap.get(1).and_then(|m| MatchFunction::from_name(m.as_str())) else {
            continue;
        };
        if !functions.contains(&function) {
            continue;
        }
        let Some(args) = cap.get(2) else {
            continue;
        };

        for arg in QUOTED_ARG_REGEX.captures_iter(args.as_str()) {
            let Some(host) = arg.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            if host.is_empty() || host == WILDCARD {
                continue;
            }
            if seen.insert(host.to_string()) {
                hosts.push(host.to_string());
            }
        }
    }

    hosts
}
