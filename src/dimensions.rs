//! Dimension model for counter data
//!
//! A counter's data is keyed by a tuple of dimension values. The set of
//! dimensions a counter carries is fixed; the codec and the keyed store both
//! depend on the set exposing one canonical ordering, so [`DimensionSet`]
//! sorts its members by case-insensitive name at construction rather than
//! trusting insertion order.
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::dimensions::{DimensionSet, DimensionSpecification};
//!
//! let dims = DimensionSet::from_names(["Host", "datacenter"]);
//! // Canonical order is case-insensitive alphabetical.
//! assert_eq!(dims.names().collect::<Vec<_>>(), vec!["datacenter", "Host"]);
//!
//! let mut spec = DimensionSpecification::new();
//! spec.set("host", "web-01");
//! spec.set("datacenter", "us-east");
//! let key = dims.key_for(&spec).unwrap();
//! assert_eq!(key.values(), ["us-east", "web-01"]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// A named categorical axis
///
/// Identity is the name string, compared case-insensitively; "Host" and
/// "host" are the same dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    name: String,
}

impl Dimension {
    /// Create a dimension from its name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The dimension's name, as originally spelled
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Dimension {}

impl std::hash::Hash for Dimension {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use std::hash::Hash;
        for byte in self.name.bytes() {
            byte.to_ascii_lowercase().hash(state);
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An ordered set of dimensions
///
/// Two sets are equal iff they contain the same dimension names. The
/// ordering is canonical (case-insensitive alphabetical) and is the ordering
/// the codec writes dimension names and key tuples in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSet {
    dimensions: Vec<Dimension>,
}

impl DimensionSet {
    /// Create an empty set
    pub fn empty() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    /// Build a set from dimension names
    ///
    /// Duplicate names (case-insensitive) collapse to the first spelling.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dimensions: Vec<Dimension> =
            names.into_iter().map(|n| Dimension::new(n)).collect();
        dimensions.sort_by(|a, b| {
            a.name
                .to_ascii_lowercase()
                .cmp(&b.name.to_ascii_lowercase())
        });
        dimensions.dedup();
        Self { dimensions }
    }

    /// Number of dimensions in the set
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Iterate dimensions in canonical order
    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }

    /// Iterate dimension names in canonical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name())
    }

    /// Check membership by name (case-insensitive)
    pub fn contains(&self, name: &str) -> bool {
        self.dimensions
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Project a complete specification onto this set's canonical order
    ///
    /// Fails when the specification lacks a value for any member dimension;
    /// extra entries in the specification are ignored.
    pub fn key_for(&self, spec: &DimensionSpecification) -> Result<DimensionKey, Error> {
        let mut values = Vec::with_capacity(self.dimensions.len());
        for dim in &self.dimensions {
            match spec.get(dim.name()) {
                Some(value) => values.push(value.to_string()),
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "specification missing value for dimension '{}'",
                        dim.name()
                    )))
                }
            }
        }
        Ok(DimensionKey::new(values))
    }
}

/// A tuple of dimension values in the owning set's canonical order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    values: Box<[String]>,
}

impl DimensionKey {
    /// Create a key from values already in canonical order
    pub fn new(values: Vec<String>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    /// The key's values in canonical order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Number of values in the tuple
    pub fn arity(&self) -> usize {
        self.values.len()
    }
}

/// A mapping from dimension name to value
///
/// May be partial (a query filter) or complete (one data point's
/// coordinates). Lookup is case-insensitive on the dimension name; storage
/// keeps keys sorted so equality and hashing are order-independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpecification {
    entries: BTreeMap<String, String>,
}

impl DimensionSpecification {
    /// Create an empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a specification from name/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut spec = Self::new();
        for (name, value) in pairs {
            spec.set(name, value);
        }
        spec
    }

    /// Set a dimension's value, replacing any case-insensitive match
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let existing = self
            .entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&name))
            .cloned();
        match existing {
            Some(key) => {
                self.entries.insert(key, value.into());
            }
            None => {
                self.entries.insert(name, value.into());
            }
        }
    }

    /// Look up a dimension's value (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of dimensions with a value
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no dimension has a value
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate name/value pairs in sorted name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
