//! Error types for the crate

use thiserror::Error;

use crate::data::DataType;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument supplied by the caller (programmer error)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Persisted-data codec error
    #[error("Persisted data error: {0}")]
    Persisted(#[from] PersistedDataError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the persisted-data codec
///
/// Callers may retry a failed read with a different file; none of these
/// variants indicate a bug in the caller.
#[derive(Error, Debug)]
pub enum PersistedDataError {
    /// Stream ended in the middle of a record
    #[error("Truncated record: stream ended mid-record")]
    Truncated,

    /// Leading magic number did not match the expected constant
    #[error("Bad magic number: 0x{found:08X}")]
    BadMagic {
        /// The magic value actually present in the stream
        found: u32,
    },

    /// Record carries a protocol version this reader does not understand
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Checksum verification failed
    #[error("Corrupt record: CRC mismatch, expected {expected:#010x}, got {actual:#010x}")]
    Corrupt {
        /// Checksum recorded in the trailer
        expected: u32,
        /// Checksum computed over the record
        actual: u32,
    },

    /// Declared entry count does not match the store being written
    #[error("Count mismatch: declared {declared}, store holds {actual}")]
    CountMismatch {
        /// Count the caller declared
        declared: u32,
        /// Count actually present after merge
        actual: u32,
    },

    /// Record body was encoded for a different value kind
    #[error("Wrong data type: expected {expected}, record holds {found}")]
    WrongDataType {
        /// Value kind requested by the caller
        expected: DataType,
        /// Value kind recorded in the header
        found: DataType,
    },

    /// Header or body field failed to decode
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// Underlying IO failure that is not a clean truncation
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for PersistedDataError {
    fn from(e: std::io::Error) -> Self {
        // A short read at any boundary is a truncation, not an IO fault.
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PersistedDataError::Truncated
        } else {
            PersistedDataError::Io(e)
        }
    }
}

/// Transport-level failures observed by the query client
///
/// These never escape the client: each one is mapped to a
/// [`RequestStatus`](crate::types::RequestStatus) on the affected server's
/// [`RequestDetails`](crate::types::RequestDetails) entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its budget
    #[error("Request timed out")]
    Timeout,

    /// The connection dropped before a response arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// A response arrived but its body could not be decoded
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
