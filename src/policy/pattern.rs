//! Wildcard patterns used by policy rules
//!
//! A pattern is either an exact value (`t3.large`) or a prefix followed by a
//! single trailing `*` (`r5.*`, `db.m5.*`). Matching is case-insensitive.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    raw: String,
    lowered: String,
    wildcard: bool,
}

impl Pattern {
    pub fn new(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty pattern".to_string());
        }

        let wildcard = raw.ends_with('*');
        let body = raw.trim_end_matches('*');
        if body.contains('*') || (wildcard && raw.len() - body.len() > 1) {
            return Err(format!(
                "pattern '{raw}' may only use a single trailing wildcard"
            ));
        }

        Ok(Self {
            raw: raw.to_string(),
            lowered: body.to_ascii_lowercase(),
            wildcard,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        let value = value.trim().to_ascii_lowercase();
        if self.wildcard {
            value.starts_with(&self.lowered) && value.len() > self.lowered.len()
        } else {
            value == self.lowered
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for Pattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pattern::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.raw
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
