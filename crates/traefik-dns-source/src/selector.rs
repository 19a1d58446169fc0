//! Label-selector expressions evaluated against object annotations
//!
//! Supports the Kubernetes selector grammar:
//! - `key=value`, `key==value`, `key!=value`
//! - `key` (exists) and `!key` (does not exist)
//! - `key in (a, b)` and `key notin (a, b)`
//!
//! Requirements are separated by commas and must all hold. An empty selector
//! matches every object.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([-a-zA-Z0-9.]*[a-zA-Z0-9])?/)?[a-zA-Z0-9]([-a-zA-Z0-9_.]*[a-zA-Z0-9])?$")
        .expect("valid regex")
});

static SET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(in|notin)\s*\(([^()]*)\)$").expect("valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("invalid requirement {0:?}")]
    InvalidRequirement(String),
    #[error("unbalanced parentheses in {0:?}")]
    UnbalancedParentheses(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    fn matches(&self, map: &BTreeMap<String, String>) -> bool {
        let value = map.get(&self.key);
        match self.operator {
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotEquals | Operator::NotIn => {
                !value.is_some_and(|v| self.values.contains(v))
            }
        }
    }

    fn parse(term: &str) -> Result<Self, SelectorError> {
        if let Some(caps) = SET_REGEX.captures(term) {
            let key = validate_key(&caps[1])?;
            let operator = if &caps[2] == "in" {
                Operator::In
            } else {
                Operator::NotIn
            };
            let values: Vec<String> = caps[3]
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect();
            if values.is_empty() {
                return Err(SelectorError::InvalidRequirement(term.to_string()));
            }
            return Ok(Self {
                key,
                operator,
                values,
            });
        }

        if let Some(key) = term.strip_prefix('!') {
            return Ok(Self {
                key: validate_key(key.trim())?,
                operator: Operator::DoesNotExist,
                values: Vec::new(),
            });
        }

        let (key, operator, value) = if let Some((k, v)) = term.split_once("!=") {
            (k, Operator::NotEquals, v)
        } else if let Some((k, v)) = term.split_once("==") {
            (k, Operator::Equals, v)
        } else if let Some((k, v)) = term.split_once('=') {
            (k, Operator::Equals, v)
        } else {
            if term.contains(char::is_whitespace) || term.contains(['(', ')']) {
                return Err(SelectorError::InvalidRequirement(term.to_string()));
            }
            return Ok(Self {
                key: validate_key(term)?,
                operator: Operator::Exists,
                values: Vec::new(),
            });
        };

        let value = value.trim();
        if value.contains(['=', '!', '(', ')', ' ']) {
            return Err(SelectorError::InvalidRequirement(term.to_string()));
        }

        Ok(Self {
            key: validate_key(key.trim())?,
            operator,
            values: vec![value.to_string()],
        })
    }
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    if KEY_REGEX.is_match(key) {
        Ok(key.to_string())
    } else {
        Err(SelectorError::InvalidKey(key.to_string()))
    }
}

/// Split on commas that are not inside a value set
fn split_terms(expr: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::UnbalancedParentheses(expr.to_string()))?;
            }
            ',' if depth == 0 => {
                terms.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::UnbalancedParentheses(expr.to_string()));
    }
    terms.push(&expr[start..]);

    Ok(terms)
}

/// A parsed selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector that matches everything
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, map: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(map))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        if expr.trim().is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_terms(expr)?
            .into_iter()
            .map(str::trim)
            .map(|term| {
                if term.is_empty() {
                    Err(SelectorError::InvalidRequirement(expr.to_string()))
                } else {
                    Requirement::parse(term)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }
}
