use std::io;
use std::path::Path;

use thiserror::Error;

/// Logical time in microseconds since 1970-01-01T00:00:00Z.
pub type HpTime = i64;

/// One framed record read from an input file.
#[derive(Clone, Debug)]
pub struct Record {
    /// Raw record bytes as they appear in the file.
    pub bytes: Vec<u8>,
    /// Stable identifier of the logical stream this record belongs to.
    pub stream_id: String,
    /// Logical time of the first sample.
    pub start_time: HpTime,
    /// Logical time of the last sample.
    pub end_time: HpTime,
}

impl Record {
    /// Byte length of the record as stored in the file.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns `true` for a zero-length record, which no reader produces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of attempting to read the next record at a byte offset.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record starting exactly at the requested offset.
    Record(Record),
    /// No further data at or beyond the offset.
    EndOfStream,
    /// The data at the offset is not in the expected format.
    ///
    /// With zero prior progress in the file this downgrades to a per-file
    /// skip; after progress it is corruption and fatal.
    NotRecognized,
    /// The data was recognized but is structurally damaged.
    Corrupt {
        /// Human-readable description of the damage.
        detail: String,
    },
}

/// Reads framed records from input files.
///
/// Implementations must support resuming exactly at any byte offset they
/// previously reported a record boundary at.
pub trait RecordRead {
    /// Reads the next record of `path` starting at `offset`.
    fn read_at(&mut self, path: &Path, offset: u64) -> io::Result<ReadOutcome>;
}

/// Details reported by the transport after a successful connect.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    /// Human-readable endpoint description for logging.
    pub endpoint: String,
    /// Whether the server granted write permission.
    pub writable: bool,
}

/// Error reported by the transport collaborator.
///
/// Transport failures are recoverable by policy: the session reconnects
/// unless quit-on-error was requested.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server actively rejected a command.
    #[error("server refused request: {0}")]
    Refused(String),

    /// The peer sent something outside the expected protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Ships records to the remote collector over a persistent connection.
pub trait Transport {
    /// Establishes the connection, reporting endpoint details.
    fn connect(&mut self) -> Result<ServerInfo, TransportError>;

    /// Sends one record, waiting for acknowledgement when `require_ack` is
    /// set. Returns only after the bytes are confirmed handed off.
    fn send(&mut self, record: &Record, require_ack: bool) -> Result<(), TransportError>;

    /// Closes the connection, best effort.
    fn disconnect(&mut self);
}

/// Optional record selection loaded from a criteria file at startup.
pub trait SelectionFilter {
    /// Returns `true` when a record with this stream id and time range
    /// should be sent.
    fn matches(&self, stream_id: &str, start_time: HpTime, end_time: HpTime) -> bool;
}
