//! Ordered field map shared by inbound messages and outbound actions

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Ordered `name -> value` map of one AMI message.
///
/// Insertion order is preserved. Lookups compare names ASCII
/// case-insensitively, so `ActionID`, `ActionId` and `actionid` address the
/// same field.
///
/// A name that repeats within one frame keeps a single entry whose value is
/// every occurrence joined with `\n` in arrival order (see [`append`](Self::append)).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Look up a field value by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.position(name.as_ref())
            .map(|idx| self.entries[idx].1.as_str())
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.position(name.as_ref())
            .is_some()
    }

    /// Set a field, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self
                .entries
                .push((name, value)),
        }
    }

    /// Add a field; a repeated name has the new value joined to the old one
    /// with a line break.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => {
                let existing = &mut self.entries[idx].1;
                existing.push('\n');
                existing.push_str(&value);
            }
            None => self
                .entries
                .push((name, value)),
        }
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<String> {
        self.position(name.as_ref())
            .map(|idx| {
                self.entries
                    .remove(idx)
                    .1
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }

    /// Iterate `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Convert into an unordered `HashMap`.
    pub fn into_map(self) -> HashMap<String, String> {
        self.entries
            .into_iter()
            .collect()
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (key, value)) in self
            .entries
            .iter()
            .enumerate()
        {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.set(key, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
