//! Counter value kinds
//!
//! Two kinds of counter data exist: plain hit counts and bucketed
//! histograms. Rather than dispatching on a runtime tag everywhere, both
//! kinds implement the [`MetricValue`] capability trait, which gives the
//! store and the codec everything they need: a wire tag, merge semantics,
//! and the value's binary encoding.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use crate::error::PersistedDataError;
use crate::persist::format::{read_i64, read_u32, read_u64};

/// Wire tag distinguishing the counter value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Plain event count
    HitCount = 0,
    /// Bucketed distribution
    Histogram = 1,
}

impl DataType {
    /// Decode a wire tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DataType::HitCount),
            1 => Some(DataType::Histogram),
            _ => None,
        }
    }

    /// Encode as a wire tag
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::HitCount => write!(f, "hitcount"),
            DataType::Histogram => write!(f, "histogram"),
        }
    }
}

/// Capability every storable counter value provides
///
/// `merge` must be associative and commutative; the store relies on that to
/// collapse duplicate keys in any order, and the query client relies on it
/// when folding partial responses.
pub trait MetricValue: Sized + Clone + Send {
    /// Wire tag for this value kind
    const DATA_TYPE: DataType;

    /// Fold another value of the same kind into this one
    fn merge(&mut self, other: &Self);

    /// Append this value's binary encoding to `out`
    fn encode(&self, out: &mut BytesMut);

    /// Decode one value from `reader`
    fn decode<R: Read>(reader: &mut R) -> Result<Self, PersistedDataError>;
}

/// Plain event counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCount {
    /// Number of observed hits
    pub hits: u64,
}

impl HitCount {
    /// Create a counter with an initial count
    pub fn new(hits: u64) -> Self {
        Self { hits }
    }

    /// Add observations, saturating at `u64::MAX`
    pub fn add(&mut self, hits: u64) {
        self.hits = self.hits.saturating_add(hits);
    }
}

impl MetricValue for HitCount {
    const DATA_TYPE: DataType = DataType::HitCount;

    fn merge(&mut self, other: &Self) {
        self.add(other.hits);
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(self.hits);
    }

    fn decode<R: Read>(reader: &mut R) -> Result<Self, PersistedDataError> {
        Ok(Self {
            hits: read_u64(reader)?,
        })
    }
}

/// Bucketed distribution counter
///
/// Buckets are keyed by an `i64` bucket key; merge sums counts per bucket
/// and treats absent buckets as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    buckets: BTreeMap<i64, u64>,
}

impl Histogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` observations to `bucket`
    pub fn record(&mut self, bucket: i64, count: u64) {
        let slot = self.buckets.entry(bucket).or_insert(0);
        *slot = slot.saturating_add(count);
    }

    /// Observation count in `bucket`, zero if absent
    pub fn count_in(&self, bucket: i64) -> u64 {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }

    /// Number of non-empty buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate `(bucket, count)` pairs in bucket order
    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.buckets.iter().map(|(k, v)| (*k, *v))
    }
}

impl MetricValue for Histogram {
    const DATA_TYPE: DataType = DataType::Histogram;

    fn merge(&mut self, other: &Self) {
        for (bucket, count) in &other.buckets {
            self.record(*bucket, *count);
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.buckets.len() as u32);
        for (bucket, count) in &self.buckets {
            out.put_i64_le(*bucket);
            out.put_u64_le(*count);
        }
    }

    fn decode<R: Read>(reader: &mut R) -> Result<Self, PersistedDataError> {
        let len = read_u32(reader)?;
        let mut buckets = BTreeMap::new();
        for _ in 0..len {
            let bucket = read_i64(reader)?;
            let count = read_u64(reader)?;
            buckets.insert(bucket, count);
        }
        Ok(Self { buckets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_count_add_saturates() {
        let mut hc = HitCount::new(u64::MAX - 5);
        hc.add(100);
        assert_eq!(hc.hits, u64::MAX);
    }

    #[test]
    fn test_hit_count_merge_is_commutative() {
        let mut a = HitCount::new(3);
        let mut b = HitCount::new(7);
        let (a0, b0) = (a, b);
        a.merge(&b0);
        b.merge(&a0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_histogram_merge_sums_buckets() {
        let mut a = Histogram::new();
        a.record(0, 1);
        a.record(100, 2);

        let mut b = Histogram::new();
        b.record(100, 3);
        b.record(200, 4);

        a.merge(&b);
        assert_eq!(a.count_in(0), 1);
        assert_eq!(a.count_in(100), 5);
        assert_eq!(a.count_in(200), 4);
        assert_eq!(a.count_in(999), 0);
    }

    #[test]
    fn test_hit_count_codec_round_trip() {
        let value = HitCount::new(0xDEAD_BEEF_CAFE);
        let mut out = BytesMut::new();
        value.encode(&mut out);

        let mut cursor = std::io::Cursor::new(&out[..]);
        let decoded = HitCount::decode(&mut cursor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_histogram_codec_round_trip() {
        let mut value = Histogram::new();
        value.record(-50, 2);
        value.record(0, 9);
        value.record(1_000, 1);

        let mut out = BytesMut::new();
        value.encode(&mut out);

        let mut cursor = std::io::Cursor::new(&out[..]);
        let decoded = Histogram::decode(&mut cursor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_truncated_value_decode() {
        let value = HitCount::new(42);
        let mut out = BytesMut::new();
        value.encode(&mut out);

        let mut cursor = std::io::Cursor::new(&out[..4]);
        assert!(matches!(
            HitCount::decode(&mut cursor),
            Err(PersistedDataError::Truncated)
        ));
    }
}
