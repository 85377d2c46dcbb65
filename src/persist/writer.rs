//! Persisted data writer
//!
//! Emits one self-describing record per [`write_data`](PersistedDataWriter::write_data)
//! call, always in the latest protocol. Records are concatenated, so a
//! single writer can append any number of records to one output.
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::data::{HitCount, KeyedDataStore};
//! use fanout_metrics::dimensions::{DimensionSet, DimensionSpecification};
//! use fanout_metrics::persist::PersistedDataWriter;
//!
//! let mut store = KeyedDataStore::<HitCount>::new(DimensionSet::from_names(["host"]));
//! let spec = DimensionSpecification::from_pairs([("host", "web-01")]);
//! store.add_value(&spec, HitCount::new(7)).unwrap();
//! store.merge();
//!
//! let mut writer = PersistedDataWriter::new(Vec::new());
//! writer.write_data("requests", 0, 60_000, 1, &[], &store).unwrap();
//! assert_eq!(writer.records_written(), 1);
//! ```

use std::io::Write;

use crate::data::{KeyedDataStore, MetricValue};
use crate::persist::format::{
    crc_digest, put_lp_str, PersistedDataSource, PersistedHeader, PERSIST_MAGIC, PROTOCOL_VERSION,
};
use crate::pool::BufferPool;
use crate::error::PersistedDataError;

/// Writer for persisted counter records
pub struct PersistedDataWriter<W: Write> {
    out: W,
    pool: BufferPool,
    records_written: u64,
}

impl<W: Write> PersistedDataWriter<W> {
    /// Create a writer over `out` with a private scratch pool
    pub fn new(out: W) -> Self {
        Self::with_pool(out, BufferPool::default())
    }

    /// Create a writer sharing an existing scratch pool
    pub fn with_pool(out: W, pool: BufferPool) -> Self {
        Self {
            out,
            pool,
            records_written: 0,
        }
    }

    /// Emit exactly one record covering `store`'s live entries
    ///
    /// The caller must have merged the store and must declare the live
    /// count; a mismatch aborts with
    /// [`PersistedDataError::CountMismatch`] before anything is written.
    pub fn write_data<V: MetricValue>(
        &mut self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        declared_count: u32,
        sources: &[PersistedDataSource],
        store: &KeyedDataStore<V>,
    ) -> Result<(), PersistedDataError> {
        let actual = store.count() as u32;
        if declared_count != actual {
            return Err(PersistedDataError::CountMismatch {
                declared: declared_count,
                actual,
            });
        }

        let header = PersistedHeader {
            name: name.to_string(),
            start_ms,
            end_ms,
            data_type: V::DATA_TYPE,
            data_count: declared_count,
            sources: sources.to_vec(),
            dimension_set: store.dimensions().clone(),
            protocol_version: PROTOCOL_VERSION,
        };

        let mut header_buf = self.pool.checkout();
        header.encode(&mut header_buf);

        let mut body_buf = self.pool.checkout();
        for (key, value) in store.iter() {
            for dimension_value in key.values() {
                put_lp_str(&mut body_buf, dimension_value);
            }
            value.encode(&mut body_buf);
        }

        let mut digest = crc_digest();
        digest.update(&header_buf);
        digest.update(&body_buf);
        let crc = digest.finalize();

        self.out.write_all(&PERSIST_MAGIC.to_le_bytes())?;
        self.out.write_all(&PROTOCOL_VERSION.to_le_bytes())?;
        self.out.write_all(&(header_buf.len() as u32).to_le_bytes())?;
        self.out.write_all(&header_buf)?;
        self.out.write_all(&body_buf)?;
        self.out.write_all(&crc.to_le_bytes())?;

        self.records_written += 1;
        Ok(())
    }

    /// Number of records emitted so far
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush the underlying output
    pub fn flush(&mut self) -> Result<(), PersistedDataError> {
        self.out.flush()?;
        Ok(())
    }

    /// Consume the writer, returning the output
    pub fn into_inner(self) -> W {
        self.out
    }
}
