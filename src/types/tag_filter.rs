// ABOUTME: Host tag sets and the tag filter used to select rollout targets.
// ABOUTME: Parses "role=web,env=prod" style filters; bare keys test presence.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Key-value tags attached to a host.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagFilterError {
    #[error("empty tag key in filter term {0:?}")]
    EmptyKey(String),

    #[error("invalid character in tag filter: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Equals(String, String),
    Present(String),
}

/// Conjunction of tag terms. An empty filter matches every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    terms: Vec<Term>,
}

impl TagFilter {
    /// Filter that selects every host.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, TagFilterError> {
        let input = input.trim();
        if input.is_empty() || input == "*" {
            return Ok(Self::any());
        }

        let mut terms = Vec::new();
        for raw in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(c) = raw
                .chars()
                .find(|c| c.is_whitespace() || matches!(c, '*' | '!' | '"' | '\''))
            {
                return Err(TagFilterError::InvalidChar(c));
            }
            let term = match raw.split_once('=') {
                Some((key, value)) => {
                    if key.is_empty() {
                        return Err(TagFilterError::EmptyKey(raw.to_string()));
                    }
                    Term::Equals(key.to_string(), value.to_string())
                }
                None => Term::Present(raw.to_string()),
            };
            terms.push(term);
        }

        Ok(Self { terms })
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.terms.iter().all(|term| match term {
            Term::Equals(key, value) => tags.get(key) == Some(value),
            Term::Present(key) => tags.contains_key(key),
        })
    }

    pub fn is_any(&self) -> bool {
        self.terms.is_empty()
    }
}

impl FromStr for TagFilter {
    type Err = TagFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("*");
        }
        let rendered: Vec<String> = self
            .terms
            .iter()
            .map(|term| match term {
                Term::Equals(k, v) => format!("{k}={v}"),
                Term::Present(k) => k.clone(),
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}
