use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::LABEL_SOURCE_UNSPEC;

/// Key an identity is allocated for.
///
/// `get_key` must return a canonical string: two keys describing the same
/// entity produce the same string, which is used as the map key on both the
/// node and the backend.
pub trait AllocatorKey: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn get_key(&self) -> String;
}

impl AllocatorKey for String {
    fn get_key(&self) -> String {
        self.clone()
    }
}

/// Single `source:key=value` label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub source: String,
}

impl Label {
    pub fn new(
        source: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `source:key=value`, `source:key` or `key=value`.
    pub fn parse(s: &str) -> Self {
        let (source, rest) = match s.split_once(':') {
            Some((src, rest)) if !src.is_empty() => (src, rest),
            Some((_, rest)) => (LABEL_SOURCE_UNSPEC, rest),
            None => (LABEL_SOURCE_UNSPEC, s),
        };
        let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
        Label::new(source, key, value)
    }

    /// Canonical form; the trailing `;` is part of the format
    fn write_sorted_entry(
        &self,
        buf: &mut String,
    ) {
        buf.push_str(&self.source);
        buf.push(':');
        buf.push_str(&self.key);
        buf.push('=');
        buf.push_str(&self.value);
        buf.push(';');
    }
}

impl fmt::Display for Label {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}:{}", self.source, self.key)
        } else {
            write!(f, "{}:{}={}", self.source, self.key, self.value)
        }
    }
}

/// Label set keyed by label key; the security principal an identity names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, Label>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `source:key=value` strings; later duplicates win.
    pub fn from_model<S: AsRef<str>>(model: &[S]) -> Self {
        model.iter().map(|s| Label::parse(s.as_ref())).collect()
    }

    /// Inverse of [`Labels::sorted_list`]
    pub fn parse_sorted_list(list: &str) -> Self {
        list.split(';').filter(|s| !s.is_empty()).map(Label::parse).collect()
    }

    pub fn insert(
        &mut self,
        label: Label,
    ) {
        self.0.insert(label.key.clone(), label);
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Label> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.values()
    }

    /// Labels sorted by key, each formatted as `source:key=value;`.
    ///
    /// This string is the key under which the identity lives in the backend
    /// and must stay stable.
    pub fn sorted_list(&self) -> String {
        let mut buf = String::with_capacity(self.0.len() * 30);
        for label in self.0.values() {
            label.write_sorted_entry(&mut buf);
        }
        buf
    }
}

impl FromIterator<Label> for Labels {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for label in iter {
            labels.insert(label);
        }
        labels
    }
}

impl fmt::Display for Labels {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let parts: Vec<String> = self.0.values().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl AllocatorKey for Labels {
    fn get_key(&self) -> String {
        self.sorted_list()
    }
}
