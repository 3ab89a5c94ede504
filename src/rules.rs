//! Ordered `(pattern, value)` tables shared by the round normalizer and the
//! event classifier. Evaluation is always first-match-wins, so the order of a
//! table is part of its meaning.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::MatchType;

/// Patterns compare against text the caller has already lower-cased.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Prefix(String),
    Contains(String),
    Regex(Regex),
}

impl Pattern {
    pub fn exact(s: &str) -> Self {
        Pattern::Exact(s.to_lowercase())
    }

    pub fn prefix(s: &str) -> Self {
        Pattern::Prefix(s.to_lowercase())
    }

    pub fn contains(s: &str) -> Self {
        Pattern::Contains(s.to_lowercase())
    }

    pub fn regex(re: &str) -> Result<Self> {
        let compiled = Regex::new(re).with_context(|| format!("Invalid rule regex: {}", re))?;
        Ok(Pattern::Regex(compiled))
    }

    pub fn from_config(match_type: MatchType, text: &str) -> Result<Self> {
        match match_type {
            MatchType::Exact => Ok(Self::exact(text)),
            MatchType::Prefix => Ok(Self::prefix(text)),
            MatchType::Contains => Ok(Self::contains(text)),
            MatchType::Regex => Self::regex(text),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Exact(p) => text == p,
            Pattern::Prefix(p) => text.starts_with(p.as_str()),
            Pattern::Contains(p) => text.contains(p.as_str()),
            Pattern::Regex(re) => re.is_match(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule<T> {
    pub pattern: Pattern,
    pub value: T,
}

impl<T> Rule<T> {
    pub fn new(pattern: Pattern, value: T) -> Self {
        Self { pattern, value }
    }
}

pub fn first_match<'a, T>(rules: &'a [Rule<T>], text: &str) -> Option<&'a T> {
    rules
        .iter()
        .find(|rule| rule.pattern.matches(text))
        .map(|rule| &rule.value)
}
