//! Keyed counter data store
//!
//! Holds counter values keyed by a dimension tuple. Writes land in a
//! pending region in amortised O(1); an explicit [`merge`](KeyedDataStore::merge)
//! folds the pending region into the sorted live region, collapsing
//! duplicate keys with the value's own merge. Enumeration and `count` see
//! live entries only.
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::data::{HitCount, KeyedDataStore};
//! use fanout_metrics::dimensions::{DimensionSet, DimensionSpecification};
//!
//! let dims = DimensionSet::from_names(["host"]);
//! let mut store = KeyedDataStore::<HitCount>::new(dims);
//!
//! let spec = DimensionSpecification::from_pairs([("host", "web-01")]);
//! store.add_value(&spec, HitCount::new(1)).unwrap();
//! store.add_value(&spec, HitCount::new(2)).unwrap();
//! assert_eq!(store.count(), 0); // nothing live until merge
//!
//! store.merge();
//! assert_eq!(store.count(), 1);
//! let (_, value) = store.iter().next().unwrap();
//! assert_eq!(value.hits, 3);
//! ```

use crate::data::value::MetricValue;
use crate::dimensions::{DimensionKey, DimensionSet, DimensionSpecification};
use crate::error::{Error, Result};

/// Counter samples keyed by a dimension tuple
///
/// Created once per counter and dropped at shutdown; dropping releases the
/// backing buffers. Mutation during enumeration is prevented by borrowing.
#[derive(Debug, Clone)]
pub struct KeyedDataStore<V> {
    dimensions: DimensionSet,
    pending: Vec<(DimensionKey, V)>,
    live: Vec<(DimensionKey, V)>,
}

impl<V: MetricValue> KeyedDataStore<V> {
    /// Create an empty store over `dimensions`
    pub fn new(dimensions: DimensionSet) -> Self {
        Self {
            dimensions,
            pending: Vec::new(),
            live: Vec::new(),
        }
    }

    /// The dimension set keys are drawn from
    pub fn dimensions(&self) -> &DimensionSet {
        &self.dimensions
    }

    /// Buffer one value under the key described by `spec`
    ///
    /// `spec` must carry a value for every dimension in the store's set.
    /// The value stays in the pending region until [`merge`](Self::merge).
    pub fn add_value(&mut self, spec: &DimensionSpecification, value: V) -> Result<()> {
        let key = self.dimensions.key_for(spec)?;
        self.pending.push((key, value));
        Ok(())
    }

    /// Buffer one value under an already-canonical key
    pub(crate) fn add_keyed(&mut self, key: DimensionKey, value: V) -> Result<()> {
        if key.arity() != self.dimensions.len() {
            return Err(Error::InvalidArgument(format!(
                "key arity {} does not match dimension count {}",
                key.arity(),
                self.dimensions.len()
            )));
        }
        self.pending.push((key, value));
        Ok(())
    }

    /// Fold the pending region into the live region
    ///
    /// Duplicate keys collapse via the value's merge, which is associative
    /// and commutative, so buffering order never affects the result.
    /// Idempotent when nothing is pending.
    pub fn merge(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.live.append(&mut self.pending);
        self.live.sort_by(|a, b| a.0.cmp(&b.0));

        let mut collapsed: Vec<(DimensionKey, V)> = Vec::with_capacity(self.live.len());
        for (key, value) in self.live.drain(..) {
            match collapsed.last_mut() {
                Some((last_key, last_value)) if *last_key == key => {
                    last_value.merge(&value);
                }
                _ => collapsed.push((key, value)),
            }
        }
        self.live = collapsed;
    }

    /// Number of distinct live keys after the most recent merge
    pub fn count(&self) -> usize {
        self.live.len()
    }

    /// Number of buffered entries not yet merged
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Enumerate live entries in sorted key order
    pub fn iter(&self) -> impl Iterator<Item = (&DimensionKey, &V)> {
        self.live.iter().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::value::{Histogram, HitCount};

    fn spec(host: &str) -> DimensionSpecification {
        DimensionSpecification::from_pairs([("host", host)])
    }

    fn hit_store() -> KeyedDataStore<HitCount> {
        KeyedDataStore::new(DimensionSet::from_names(["host"]))
    }

    #[test]
    fn test_writes_are_buffered_until_merge() {
        let mut store = hit_store();
        store.add_value(&spec("a"), HitCount::new(1)).unwrap();
        assert_eq!(store.count(), 0);
        assert_eq!(store.pending_len(), 1);

        store.merge();
        assert_eq!(store.count(), 1);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_merge_collapses_duplicate_keys() {
        let mut store = hit_store();
        store.add_value(&spec("a"), HitCount::new(1)).unwrap();
        store.add_value(&spec("b"), HitCount::new(10)).unwrap();
        store.add_value(&spec("a"), HitCount::new(2)).unwrap();
        store.merge();

        assert_eq!(store.count(), 2);
        let entries: Vec<_> = store.iter().collect();
        assert_eq!(entries[0].0.values(), ["a"]);
        assert_eq!(entries[0].1.hits, 3);
        assert_eq!(entries[1].1.hits, 10);
    }

    #[test]
    fn test_merge_is_idempotent_on_empty_buffer() {
        let mut store = hit_store();
        store.add_value(&spec("a"), HitCount::new(5)).unwrap();
        store.merge();
        store.merge();
        assert_eq!(store.count(), 1);
        assert_eq!(store.iter().next().unwrap().1.hits, 5);
    }

    #[test]
    fn test_merge_across_batches() {
        let mut store = hit_store();
        store.add_value(&spec("a"), HitCount::new(1)).unwrap();
        store.merge();
        store.add_value(&spec("a"), HitCount::new(4)).unwrap();
        store.merge();

        assert_eq!(store.count(), 1);
        assert_eq!(store.iter().next().unwrap().1.hits, 5);
    }

    #[test]
    fn test_incomplete_spec_rejected() {
        let mut store: KeyedDataStore<HitCount> =
            KeyedDataStore::new(DimensionSet::from_names(["host", "zone"]));
        let result = store.add_value(&spec("a"), HitCount::new(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_histogram_store_merges_buckets() {
        let mut store: KeyedDataStore<Histogram> =
            KeyedDataStore::new(DimensionSet::from_names(["host"]));

        let mut h1 = Histogram::new();
        h1.record(0, 1);
        let mut h2 = Histogram::new();
        h2.record(0, 2);
        h2.record(10, 7);

        store.add_value(&spec("a"), h1).unwrap();
        store.add_value(&spec("a"), h2).unwrap();
        store.merge();

        assert_eq!(store.count(), 1);
        let (_, merged) = store.iter().next().unwrap();
        assert_eq!(merged.count_in(0), 3);
        assert_eq!(merged.count_in(10), 7);
    }

    #[test]
    fn test_enumeration_order_is_stable() {
        let mut store = hit_store();
        for host in ["c", "a", "b"] {
            store.add_value(&spec(host), HitCount::new(1)).unwrap();
        }
        store.merge();

        let keys: Vec<_> = store.iter().map(|(k, _)| k.values()[0].clone()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }
}
