//! Persisted data reader
//!
//! Streams records out of a persisted counter file. `read_data_header`
//! advances to the next record (returning `false` on clean end-of-stream at
//! a record boundary); `read_data` streams the body's `(key, value)` pairs
//! to a visitor without materialising the whole table; `load_data` builds a
//! [`KeyedDataStore`] when materialisation is wanted.
//!
//! Both the latest and the legacy protocol decode to the same in-memory
//! representation. Callers holding legacy files can check
//! [`is_latest_protocol`](PersistedDataReader::is_latest_protocol) and
//! rewrite via [`upgrade_records`](crate::persist::upgrade_records).
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::data::{HitCount, KeyedDataStore};
//! use fanout_metrics::dimensions::{DimensionSet, DimensionSpecification};
//! use fanout_metrics::persist::{PersistedDataReader, PersistedDataWriter};
//!
//! let mut store = KeyedDataStore::<HitCount>::new(DimensionSet::from_names(["host"]));
//! let spec = DimensionSpecification::from_pairs([("host", "web-01")]);
//! store.add_value(&spec, HitCount::new(7)).unwrap();
//! store.merge();
//!
//! let mut writer = PersistedDataWriter::new(Vec::new());
//! writer.write_data("requests", 0, 60_000, 1, &[], &store).unwrap();
//! let bytes = writer.into_inner();
//!
//! let mut reader = PersistedDataReader::new(&bytes[..]);
//! assert!(reader.read_data_header().unwrap());
//! let loaded = reader.load_data::<HitCount>().unwrap();
//! assert_eq!(loaded.count(), 1);
//! assert!(!reader.read_data_header().unwrap());
//! ```

use crc::Digest;
use std::io::Read;
use tracing::error;

use crate::data::{DataType, Histogram, HitCount, KeyedDataStore, MetricValue};
use crate::dimensions::DimensionKey;
use crate::error::{Error, PersistedDataError};
use crate::persist::format::{
    crc_digest, read_lp_str, read_u16, read_u32, PersistedHeader, LEGACY_PROTOCOL_VERSION,
    MAX_HEADER_LEN, PERSIST_MAGIC, PROTOCOL_VERSION,
};
use crate::pool::BufferPool;

/// Reader for persisted counter records
pub struct PersistedDataReader<R: Read> {
    input: R,
    pool: BufferPool,
    current: Option<RecordState>,
}

struct RecordState {
    header: PersistedHeader,
    // Present until the trailer check consumes it.
    digest: Option<Digest<'static, u32>>,
    body_consumed: bool,
}

impl<R: Read> PersistedDataReader<R> {
    /// Create a reader over `input` with a private scratch pool
    pub fn new(input: R) -> Self {
        Self::with_pool(input, BufferPool::default())
    }

    /// Create a reader sharing an existing scratch pool
    pub fn with_pool(input: R, pool: BufferPool) -> Self {
        Self {
            input,
            pool,
            current: None,
        }
    }

    /// Advance to the next record
    ///
    /// Returns `Ok(false)` iff the stream ends cleanly at a record
    /// boundary. Any partial record surfaces as
    /// [`PersistedDataError::Truncated`]; this never panics. An unread body
    /// of the previous record is decoded and discarded to stay aligned.
    pub fn read_data_header(&mut self) -> Result<bool, PersistedDataError> {
        if let Some(state) = &self.current {
            if !state.body_consumed {
                self.skip_current_body()?;
            }
        }
        self.current = None;

        let mut magic_bytes = [0u8; 4];
        let n = read_some(&mut self.input, &mut magic_bytes)?;
        if n == 0 {
            return Ok(false);
        }
        if n < magic_bytes.len() {
            return Err(PersistedDataError::Truncated);
        }
        let magic = u32::from_le_bytes(magic_bytes);
        if magic != PERSIST_MAGIC {
            error!(found = format!("{magic:#010x}"), "bad magic number in record");
            return Err(PersistedDataError::BadMagic { found: magic });
        }

        let version = read_u16(&mut self.input)?;
        if version != PROTOCOL_VERSION && version != LEGACY_PROTOCOL_VERSION {
            error!(version, "unsupported protocol version in record");
            return Err(PersistedDataError::UnsupportedVersion(version));
        }

        let header_len = read_u32(&mut self.input)?;
        if header_len > MAX_HEADER_LEN {
            return Err(PersistedDataError::Malformed(format!(
                "header length {header_len} exceeds limit"
            )));
        }

        let mut scratch = self.pool.checkout();
        scratch.resize(header_len as usize, 0);
        self.input.read_exact(&mut scratch)?;

        let header = PersistedHeader::parse(&scratch, version)?;
        let mut digest = crc_digest();
        digest.update(&scratch);

        self.current = Some(RecordState {
            header,
            digest: Some(digest),
            body_consumed: false,
        });
        Ok(true)
    }

    /// The current record's header, if one is positioned
    pub fn header(&self) -> Option<&PersistedHeader> {
        self.current.as_ref().map(|s| &s.header)
    }

    /// Whether the current record is in the latest protocol
    ///
    /// `false` when no record is positioned.
    pub fn is_latest_protocol(&self) -> bool {
        self.current
            .as_ref()
            .map(|s| s.header.is_latest_protocol())
            .unwrap_or(false)
    }

    /// Stream every `(key, value)` pair of the current record to `visitor`
    ///
    /// The table is never materialised here; keys arrive in the order they
    /// were written. The CRC trailer is verified after the last entry
    /// (latest protocol only).
    pub fn read_data<V, F>(&mut self, mut visitor: F) -> Result<(), PersistedDataError>
    where
        V: MetricValue,
        F: FnMut(DimensionKey, V),
    {
        let state = self.current.as_mut().ok_or_else(|| {
            PersistedDataError::Malformed("no record positioned; call read_data_header".to_string())
        })?;
        if state.body_consumed {
            return Err(PersistedDataError::Malformed(
                "record body already consumed".to_string(),
            ));
        }
        if V::DATA_TYPE != state.header.data_type {
            return Err(PersistedDataError::WrongDataType {
                expected: V::DATA_TYPE,
                found: state.header.data_type,
            });
        }

        let dimension_count = state.header.dimension_set.len();
        let data_count = state.header.data_count;
        {
            let digest = state
                .digest
                .as_mut()
                .expect("digest present until trailer check");
            let mut body = DigestReader {
                inner: &mut self.input,
                digest,
            };
            for _ in 0..data_count {
                let mut values = Vec::with_capacity(dimension_count);
                for _ in 0..dimension_count {
                    values.push(read_lp_str(&mut body)?);
                }
                let value = V::decode(&mut body)?;
                visitor(DimensionKey::new(values), value);
            }
        }
        state.body_consumed = true;

        if state.header.is_latest_protocol() {
            let actual = state
                .digest
                .take()
                .expect("digest present until trailer check")
                .finalize();
            let expected = read_u32(&mut self.input)?;
            if expected != actual {
                error!(
                    record = %state.header.name,
                    expected = format!("{expected:#010x}"),
                    actual = format!("{actual:#010x}"),
                    "CRC mismatch, record is corrupt"
                );
                return Err(PersistedDataError::Corrupt { expected, actual });
            }
        } else {
            state.digest = None;
        }
        Ok(())
    }

    /// Materialise the current record into a [`KeyedDataStore`]
    pub fn load_data<V: MetricValue>(&mut self) -> Result<KeyedDataStore<V>, Error> {
        let dimensions = self
            .header()
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "no record positioned; call read_data_header".to_string(),
                )
            })?
            .dimension_set
            .clone();

        let mut entries = Vec::new();
        self.read_data::<V, _>(|key, value| entries.push((key, value)))?;

        let mut store = KeyedDataStore::new(dimensions);
        for (key, value) in entries {
            store.add_keyed(key, value)?;
        }
        store.merge();
        Ok(store)
    }

    // Decode and discard the current body so the stream stays aligned for
    // the next header.
    fn skip_current_body(&mut self) -> Result<(), PersistedDataError> {
        let data_type = match self.current.as_ref() {
            Some(state) if !state.body_consumed => state.header.data_type,
            _ => return Ok(()),
        };
        match data_type {
            DataType::HitCount => self.read_data::<HitCount, _>(|_, _| {}),
            DataType::Histogram => self.read_data::<Histogram, _>(|_, _| {}),
        }
    }
}

// Feeds every byte it hands out through the record's CRC digest.
struct DigestReader<'a, R: Read> {
    inner: &'a mut R,
    digest: &'a mut Digest<'static, u32>,
}

impl<R: Read> Read for DigestReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }
}

// Fill `buf` as far as the stream allows; short only at end-of-stream.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, PersistedDataError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HitCount;
    use crate::dimensions::{DimensionSet, DimensionSpecification};
    use crate::persist::format::{put_lp_str, PersistedDataSource, SourceStatus};
    use crate::persist::PersistedDataWriter;
    use bytes::{BufMut, BytesMut};

    fn store_with(hosts: &[(&str, u64)]) -> KeyedDataStore<HitCount> {
        let mut store = KeyedDataStore::new(DimensionSet::from_names(["host"]));
        for (host, hits) in hosts {
            let spec = DimensionSpecification::from_pairs([("host", *host)]);
            store.add_value(&spec, HitCount::new(*hits)).unwrap();
        }
        store.merge();
        store
    }

    fn encoded_record() -> Vec<u8> {
        let store = store_with(&[("web-01", 3), ("web-02", 9)]);
        let sources = vec![PersistedDataSource::new("agg-1", SourceStatus::Available)];
        let mut writer = PersistedDataWriter::new(Vec::new());
        writer
            .write_data("requests", 1_000, 2_000, 2, &sources, &store)
            .unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let bytes = encoded_record();
        let mut reader = PersistedDataReader::new(&bytes[..]);

        assert!(reader.read_data_header().unwrap());
        let header = reader.header().unwrap();
        assert_eq!(header.name, "requests");
        assert_eq!(header.start_ms, 1_000);
        assert_eq!(header.end_ms, 2_000);
        assert_eq!(header.data_count, 2);
        assert_eq!(header.sources.len(), 1);
        assert!(reader.is_latest_protocol());

        let store = reader.load_data::<HitCount>().unwrap();
        assert_eq!(store.count(), 2);
        let entries: Vec<_> = store.iter().collect();
        assert_eq!(entries[0].0.values(), ["web-01"]);
        assert_eq!(entries[0].1.hits, 3);
        assert_eq!(entries[1].1.hits, 9);

        assert!(!reader.read_data_header().unwrap());
    }

    #[test]
    fn test_wrong_value_kind_rejected() {
        let bytes = encoded_record();
        let mut reader = PersistedDataReader::new(&bytes[..]);
        reader.read_data_header().unwrap();

        let result = reader.load_data::<Histogram>();
        assert!(matches!(
            result,
            Err(Error::Persisted(PersistedDataError::WrongDataType { .. }))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encoded_record();
        bytes[0] ^= 0xFF;
        let mut reader = PersistedDataReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_data_header(),
            Err(PersistedDataError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encoded_record();
        bytes[4] = 99;
        let mut reader = PersistedDataReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_data_header(),
            Err(PersistedDataError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_corrupt_body_detected() {
        let mut bytes = encoded_record();
        let flip_at = bytes.len() - 8; // inside the last value, before the CRC
        bytes[flip_at] ^= 0x01;
        let mut reader = PersistedDataReader::new(&bytes[..]);
        reader.read_data_header().unwrap();

        let result = reader.read_data::<HitCount, _>(|_, _| {});
        assert!(matches!(result, Err(PersistedDataError::Corrupt { .. })));
    }

    #[test]
    fn test_skip_unread_body_between_records() {
        let store = store_with(&[("web-01", 1)]);
        let mut writer = PersistedDataWriter::new(Vec::new());
        writer.write_data("first", 0, 1, 1, &[], &store).unwrap();
        writer.write_data("second", 1, 2, 1, &[], &store).unwrap();
        let bytes = writer.into_inner();

        let mut reader = PersistedDataReader::new(&bytes[..]);
        assert!(reader.read_data_header().unwrap());
        assert_eq!(reader.header().unwrap().name, "first");

        // Body of "first" never read; the reader realigns on its own.
        assert!(reader.read_data_header().unwrap());
        assert_eq!(reader.header().unwrap().name, "second");
        let store = reader.load_data::<HitCount>().unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_legacy_record_maps_to_latest_representation() {
        // Hand-assembled version-1 record: no source section, no CRC.
        let mut header = BytesMut::new();
        put_lp_str(&mut header, "legacy");
        header.put_i64_le(5);
        header.put_i64_le(6);
        header.put_u8(DataType::HitCount.as_u8());
        header.put_u32_le(1);
        header.put_u16_le(1);
        put_lp_str(&mut header, "host");

        let mut body = BytesMut::new();
        put_lp_str(&mut body, "web-01");
        body.put_u64_le(42);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PERSIST_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&LEGACY_PROTOCOL_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&body);

        let mut reader = PersistedDataReader::new(&bytes[..]);
        assert!(reader.read_data_header().unwrap());
        assert!(!reader.is_latest_protocol());
        assert!(reader.header().unwrap().sources.is_empty());

        let store = reader.load_data::<HitCount>().unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.iter().next().unwrap().1.hits, 42);
        assert!(!reader.read_data_header().unwrap());
    }

    #[test]
    fn test_every_prefix_fails_cleanly() {
        let bytes = encoded_record();
        for cut in 0..bytes.len() {
            let mut reader = PersistedDataReader::new(&bytes[..cut]);
            match reader.read_data_header() {
                Ok(false) => assert_eq!(cut, 0, "only an empty stream is a clean miss"),
                Ok(true) => {
                    // Header happened to fit; the body must fail.
                    let result = reader.read_data::<HitCount, _>(|_, _| {});
                    assert!(result.is_err(), "prefix {cut} produced data");
                }
                Err(_) => {}
            }
        }
    }

    #[test]
    fn test_upgrade_rewrites_legacy_as_latest() {
        // Legacy input assembled as in the legacy test above.
        let mut header = BytesMut::new();
        put_lp_str(&mut header, "legacy");
        header.put_i64_le(5);
        header.put_i64_le(6);
        header.put_u8(DataType::HitCount.as_u8());
        header.put_u32_le(1);
        header.put_u16_le(1);
        put_lp_str(&mut header, "host");
        let mut body = BytesMut::new();
        put_lp_str(&mut body, "web-01");
        body.put_u64_le(42);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PERSIST_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&LEGACY_PROTOCOL_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&body);

        let mut reader = PersistedDataReader::new(&bytes[..]);
        let mut writer = PersistedDataWriter::new(Vec::new());
        let rewritten = crate::persist::upgrade_records(&mut reader, &mut writer).unwrap();
        assert_eq!(rewritten, 1);

        let upgraded = writer.into_inner();
        let mut reader = PersistedDataReader::new(&upgraded[..]);
        assert!(reader.read_data_header().unwrap());
        assert!(reader.is_latest_protocol());
        let store = reader.load_data::<HitCount>().unwrap();
        assert_eq!(store.iter().next().unwrap().1.hits, 42);
    }
}
