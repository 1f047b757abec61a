//! Label selectors used to filter and bulk delete the members of a group.
//!
//! The textual form is `key:value(;key:value)*`. Whitespace around pairs, keys
//! and values is stripped. The value is everything after the first `:` so it may
//! itself contain colons.

use crate::model::Configuration;
use std::collections::BTreeMap;
use std::fmt;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LabelsError {
    #[error("empty label pair at position {0}")]
    EmptyPair(usize),
    #[error("label pair `{0}` is missing a `:` separator")]
    MissingSeparator(String),
    #[error("label pair `{0}` has an empty key")]
    EmptyKey(String),
    #[error("label `{0}` has an empty value")]
    EmptyValue(String),
    #[error("label `{0}` is given more than once")]
    DuplicateKey(String),
}

/// A set of wanted `key -> value` pairs. Every pair must be present on a
/// configuration for it to match; the empty set matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn parse(input: &str) -> Result<Self, LabelsError> {
        let mut wanted = BTreeMap::new();
        if input.trim().is_empty() {
            return Ok(LabelSet(wanted));
        }

        for (position, pair) in input.split(';').enumerate() {
            let pair = pair.trim();
            if pair.is_empty() {
                return Err(LabelsError::EmptyPair(position));
            }

            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| LabelsError::MissingSeparator(pair.to_string()))?;
            let (key, value) = (key.trim(), value.trim());

            if key.is_empty() {
                return Err(LabelsError::EmptyKey(pair.to_string()));
            }
            if value.is_empty() {
                return Err(LabelsError::EmptyValue(key.to_string()));
            }
            if wanted.insert(key.to_string(), value.to_string()).is_some() {
                return Err(LabelsError::DuplicateKey(key.to_string()));
            }
        }

        Ok(LabelSet(wanted))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Exact, case sensitive comparison of every wanted pair against the
    /// configuration's labels.
    pub fn matches(&self, config: &Configuration) -> bool {
        if self.is_empty() {
            return true;
        }
        let labels = config.label_map();
        self.iter()
            .all(|(key, value)| labels.get(key).is_some_and(|have| *have == value))
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        LabelSet(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{key}:{value}")?;
        }
        Ok(())
    }
}
