//! Exact-or-pattern selection over named items.
//!
//! Repository removal, repository refresh and feature version listing all
//! accept either an exact identifier or a regular expression. They share
//! [`Selector::select`].

use regex::Regex;

use crate::error::{FeatureError, Result};

/// A parsed selector.
#[derive(Debug, Clone)]
pub struct Selector {
    raw: String,
    pattern: Option<Regex>,
}

impl Selector {
    /// Build a selector.
    ///
    /// The pattern must match a whole key. A selector that is not a valid regular
    /// expression can still match exactly; it only fails when [`Selector::select`]
    /// finds no exact match and needs the pattern.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        // Anchor only a pattern that is valid on its own
        let pattern = Regex::new(&raw)
            .and_then(|_| Regex::new(&format!("^(?:{})$", raw)))
            .ok();
        Self { raw, pattern }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Select items whose keys match.
    ///
    /// Exact matches win: if any item has a key equal to the selector, only
    /// those items are returned. Otherwise the pattern is applied to every key,
    /// and a match on any key qualifies the item.
    pub fn select<'a, T, F>(&self, items: &'a [T], keys: F) -> Result<Vec<&'a T>>
    where
        F: Fn(&T) -> Vec<&str>,
    {
        let exact: Vec<&T> = items
            .iter()
            .filter(|item| keys(*item).contains(&self.raw.as_str()))
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        let pattern = match &self.pattern {
            Some(p) => p,
            None => {
                let source = Regex::new(&self.raw)
                    .err()
                    .unwrap_or(regex::Error::Syntax(self.raw.clone()));
                return Err(FeatureError::InvalidPattern {
                    pattern: self.raw.clone(),
                    source,
                });
            }
        };

        Ok(items
            .iter()
            .filter(|item| keys(*item).into_iter().any(|k| pattern.is_match(k)))
            .collect())
    }
}
