//! Annotation resolution
//!
//! Reads the hostname override, target, TTL and set identifier from an
//! object's annotations. Nothing here fails: a malformed value degrades to its
//! default and is logged.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::config::annotations;

/// Largest TTL accepted, matching a signed 32-bit seconds field
const TTL_MAX: i64 = i32::MAX as i64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TtlError {
    #[error("not an integer or duration: {0:?}")]
    Invalid(String),
    #[error("TTL {0} outside 1..=2147483647")]
    OutOfRange(i64),
}

/// Values taken from an object's annotations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedAnnotations {
    /// Override hostnames, in declared order, without duplicates
    pub hostnames: Vec<String>,
    /// Target the endpoints point at; `None` means nothing is emitted
    pub target: Option<String>,
    /// Record TTL in seconds, 0 when unset
    pub ttl: i64,
    pub set_identifier: Option<String>,
}

/// Resolve all annotation-driven values.
///
/// With `ignore_hostname_annotation` the hostname override is not read.
pub fn resolve(
    annots: &BTreeMap<String, String>,
    ignore_hostname_annotation: bool,
) -> ResolvedAnnotations {
    let hostnames = if ignore_hostname_annotation {
        Vec::new()
    } else {
        parse_hostnames(annots)
    };

    ResolvedAnnotations {
        hostnames,
        target: non_blank(annots.get(annotations::TARGET)),
        ttl: resolve_ttl(annots),
        set_identifier: non_blank(annots.get(annotations::SET_IDENTIFIER)),
    }
}

/// Parse comma-separated hostnames from the hostname annotation
pub fn parse_hostnames(annots: &BTreeMap<String, String>) -> Vec<String> {
    let mut hostnames: Vec<String> = Vec::new();

    let Some(value) = annots.get(annotations::HOSTNAME) else {
        return hostnames;
    };

    for host in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !hostnames.iter().any(|h| h == host) {
            hostnames.push(host.to_string());
        }
    }

    hostnames
}

/// Whether the object is left to this source by the controller annotation
pub fn is_controlled_by_us(annots: &BTreeMap<String, String>) -> bool {
    annots
        .get(annotations::CONTROLLER)
        .map(|v| v == annotations::CONTROLLER_VALUE)
        .unwrap_or(true)
}

fn resolve_ttl(annots: &BTreeMap<String, String>) -> i64 {
    let Some(value) = annots.get(annotations::TTL) else {
        return 0;
    };

    match parse_ttl(value) {
        Ok(ttl) => ttl,
        Err(e) => {
            warn!(value = %value, error = %e, "Ignoring invalid TTL annotation");
            0
        }
    }
}

/// Parse a TTL given as integer seconds or as a `s`/`m`/`h` duration
/// (e.g. `90`, `30s`, `5m`, `1h30m`).
pub fn parse_ttl(value: &str) -> Result<i64, TtlError> {
    let value = value.trim();
    let seconds = match value.parse::<i64>() {
        Ok(seconds) => seconds,
        Err(_) => parse_duration_secs(value).ok_or_else(|| TtlError::Invalid(value.to_string()))?,
    };

    if !(1..=TTL_MAX).contains(&seconds) {
        return Err(TtlError::OutOfRange(seconds));
    }
    Ok(seconds)
}

fn parse_duration_secs(value: &str) -> Option<i64> {
    if value.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    let mut digits = String::new();

    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let amount: i64 = digits.parse().ok()?;
        total = total.checked_add(amount.checked_mul(unit)?)?;
        digits.clear();
    }

    // Trailing digits without a unit
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(String::from)
}
