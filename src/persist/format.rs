//! Persisted record format: constants, header, and wire primitives
//!
//! # Record Layout (latest protocol)
//!
//! ```text
//! Offset | Size | Field
//! -------|------|-----------------------------
//!   0    |  4   | magic (u32, little-endian)
//!   4    |  2   | protocol_version (u16)
//!   6    |  4   | header_length (u32)
//!  10    |  n   | header section (see below)
//!  10+n  |  m   | body: data_count entries of key tuple + value
//!  ...   |  4   | CRC32 of header + body
//! ```
//!
//! Header section:
//!
//! ```text
//! name               length-prefixed utf-8
//! start_ms           i64
//! end_ms             i64
//! data_type          u8 (0 = hitcount, 1 = histogram)
//! data_count         u32
//! dimension_count    u16
//! dimension_names    dimension_count x length-prefixed utf-8, canonical order
//! source_count       u32
//! sources            source_count x { name: lp-utf-8, status: u8 }
//! ```
//!
//! The legacy protocol (version 1) is identical except the header stops
//! after the dimension names (no source section) and the record carries no
//! CRC trailer. Legacy records are accepted on read only.

use bytes::{BufMut, BytesMut};
use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

use crate::data::DataType;
use crate::dimensions::DimensionSet;
use crate::error::PersistedDataError;

/// Magic number identifying a persisted counter record ("CDAT" on the wire)
pub const PERSIST_MAGIC: u32 = 0x5441_4443;

/// Latest protocol version; the writer always emits this
pub const PROTOCOL_VERSION: u16 = 2;

/// Legacy protocol version, accepted on read only
pub const LEGACY_PROTOCOL_VERSION: u16 = 1;

/// Upper bound on the header section, to refuse absurd lengths before
/// allocating
pub(crate) const MAX_HEADER_LEN: u32 = 1024 * 1024;

/// Upper bound on any single length-prefixed string
pub(crate) const MAX_STRING_LEN: u32 = 64 * 1024;

/// CRC-32 calculator used for the record trailer
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Start an incremental CRC digest for one record
pub(crate) fn crc_digest() -> Digest<'static, u32> {
    CRC32.digest()
}

/// Checksum a contiguous byte run
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Availability of one contributing source at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceStatus {
    /// Source was reachable and contributed data
    Available = 0,
    /// Source was known but unreachable
    Unavailable = 1,
    /// Source state could not be determined
    Unknown = 2,
}

impl SourceStatus {
    /// Decode a wire tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SourceStatus::Available),
            1 => Some(SourceStatus::Unavailable),
            2 => Some(SourceStatus::Unknown),
            _ => None,
        }
    }

    /// Encode as a wire tag
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Available => write!(f, "available"),
            SourceStatus::Unavailable => write!(f, "unavailable"),
            SourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One source that contributed to a persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDataSource {
    /// Source name
    pub name: String,
    /// Availability at write time
    pub status: SourceStatus,
}

impl PersistedDataSource {
    /// Create a source entry
    pub fn new(name: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// In-memory mirror of one record's header section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHeader {
    /// Counter name
    pub name: String,
    /// Window start, milliseconds since epoch
    pub start_ms: i64,
    /// Window end, milliseconds since epoch
    pub end_ms: i64,
    /// Value kind of the record body
    pub data_type: DataType,
    /// Number of `(key, value)` entries in the body
    pub data_count: u32,
    /// Sources that contributed; empty for legacy records
    pub sources: Vec<PersistedDataSource>,
    /// Dimension set the key tuples are ordered by
    pub dimension_set: DimensionSet,
    /// Protocol version this record was read as (writers always emit the
    /// latest)
    pub protocol_version: u16,
}

impl PersistedHeader {
    /// Whether this record is in the latest protocol
    pub fn is_latest_protocol(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }

    /// Encode the header section (latest protocol only)
    pub(crate) fn encode(&self, out: &mut BytesMut) {
        put_lp_str(out, &self.name);
        out.put_i64_le(self.start_ms);
        out.put_i64_le(self.end_ms);
        out.put_u8(self.data_type.as_u8());
        out.put_u32_le(self.data_count);
        out.put_u16_le(self.dimension_set.len() as u16);
        for name in self.dimension_set.names() {
            put_lp_str(out, name);
        }
        out.put_u32_le(self.sources.len() as u32);
        for source in &self.sources {
            put_lp_str(out, &source.name);
            out.put_u8(source.status.as_u8());
        }
    }

    /// Parse a header section read as `protocol_version`
    pub(crate) fn parse(
        bytes: &[u8],
        protocol_version: u16,
    ) -> Result<Self, PersistedDataError> {
        let mut cursor = std::io::Cursor::new(bytes);

        let name = read_lp_str(&mut cursor)?;
        let start_ms = read_i64(&mut cursor)?;
        let end_ms = read_i64(&mut cursor)?;
        let type_tag = read_u8(&mut cursor)?;
        let data_type = DataType::from_u8(type_tag).ok_or_else(|| {
            PersistedDataError::Malformed(format!("unknown data type tag {type_tag}"))
        })?;
        let data_count = read_u32(&mut cursor)?;

        let dimension_count = read_u16(&mut cursor)?;
        let mut names = Vec::with_capacity(dimension_count as usize);
        for _ in 0..dimension_count {
            names.push(read_lp_str(&mut cursor)?);
        }
        let dimension_set = DimensionSet::from_names(names);
        if dimension_set.len() != dimension_count as usize {
            return Err(PersistedDataError::Malformed(
                "duplicate dimension names in header".to_string(),
            ));
        }

        let sources = if protocol_version >= PROTOCOL_VERSION {
            let source_count = read_u32(&mut cursor)?;
            let mut sources = Vec::with_capacity(source_count.min(1024) as usize);
            for _ in 0..source_count {
                let name = read_lp_str(&mut cursor)?;
                let status_tag = read_u8(&mut cursor)?;
                let status = SourceStatus::from_u8(status_tag).ok_or_else(|| {
                    PersistedDataError::Malformed(format!(
                        "unknown source status tag {status_tag}"
                    ))
                })?;
                sources.push(PersistedDataSource { name, status });
            }
            sources
        } else {
            Vec::new()
        };

        if cursor.position() != bytes.len() as u64 {
            return Err(PersistedDataError::Malformed(
                "trailing bytes after header fields".to_string(),
            ));
        }

        Ok(Self {
            name,
            start_ms,
            end_ms,
            data_type,
            data_count,
            sources,
            dimension_set,
            protocol_version,
        })
    }
}

// --- wire primitives ---
//
// All multi-byte integers are little-endian. Short reads surface as
// `Truncated` through the io::Error conversion.

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8, PersistedDataError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(reader: &mut R) -> Result<u16, PersistedDataError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32, PersistedDataError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64, PersistedDataError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(reader: &mut R) -> Result<i64, PersistedDataError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Read one length-prefixed utf-8 string
pub(crate) fn read_lp_str<R: Read>(reader: &mut R) -> Result<String, PersistedDataError> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(PersistedDataError::Malformed(format!(
            "string length {len} exceeds limit"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| PersistedDataError::Malformed("invalid utf-8 in string".to_string()))
}

/// Append one length-prefixed utf-8 string
pub(crate) fn put_lp_str(out: &mut BytesMut, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}
