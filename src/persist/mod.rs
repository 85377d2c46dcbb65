//! Persisted counter data codec
//!
//! Counter data is persisted as a concatenation of self-describing records,
//! each `header + body + CRC`. The writer always emits the latest protocol;
//! the reader accepts the latest and the legacy version, mapping legacy
//! fields onto the same in-memory representation so callers can detect old
//! files (via [`PersistedDataReader::is_latest_protocol`]) and rewrite them.
//!
//! Files are append-safe: a clean truncation at a record boundary yields
//! fewer records, never corruption.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{
    PersistedDataSource, PersistedHeader, SourceStatus, LEGACY_PROTOCOL_VERSION, PERSIST_MAGIC,
    PROTOCOL_VERSION,
};
pub use reader::PersistedDataReader;
pub use writer::PersistedDataWriter;

use std::io::{Read, Write};

use crate::data::{DataType, Histogram, HitCount, MetricValue};
use crate::error::Result;

/// Rewrite every remaining record from `reader` through `writer` in the
/// latest protocol
///
/// Returns the number of records rewritten. In-memory data is preserved
/// bit-for-bit; only the container format changes.
pub fn upgrade_records<R: Read, W: Write>(
    reader: &mut PersistedDataReader<R>,
    writer: &mut PersistedDataWriter<W>,
) -> Result<u64> {
    let mut rewritten = 0;
    while reader.read_data_header()? {
        let Some(header) = reader.header().cloned() else {
            break;
        };
        match header.data_type {
            DataType::HitCount => rewrite_one::<_, _, HitCount>(reader, writer, &header)?,
            DataType::Histogram => rewrite_one::<_, _, Histogram>(reader, writer, &header)?,
        }
        rewritten += 1;
    }
    Ok(rewritten)
}

fn rewrite_one<R: Read, W: Write, V: MetricValue>(
    reader: &mut PersistedDataReader<R>,
    writer: &mut PersistedDataWriter<W>,
    header: &PersistedHeader,
) -> Result<()> {
    let store = reader.load_data::<V>()?;
    writer.write_data(
        &header.name,
        header.start_ms,
        header.end_ms,
        store.count() as u32,
        &header.sources,
        &store,
    )?;
    Ok(())
}
