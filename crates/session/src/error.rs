use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::collab::TransportError;

/// Fatal condition terminating a transfer session.
///
/// Everything here maps to a non-zero exit status. Recoverable transport
/// failures never surface as a `SessionError` unless quit-on-error converts
/// them.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server did not grant write permission.
    #[error("write permission not granted by {endpoint}")]
    WriteRefused {
        /// Endpoint that refused writes.
        endpoint: String,
    },

    /// A transport failure escalated by the quit-on-error policy.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading an input file failed outright.
    #[error("error reading '{}': {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Record data turned corrupt after partial progress in a file.
    ///
    /// Resuming into unknown file state risks sending duplicates or skipping
    /// data, so the whole session aborts rather than guessing.
    #[error("corrupt data in '{}' at offset {offset}: {detail}", path.display())]
    Corrupt {
        /// File containing the damage.
        path: PathBuf,
        /// Offset the reader stopped at.
        offset: u64,
        /// Reader-provided description.
        detail: String,
    },

    /// Progress could not be persisted.
    #[error(transparent)]
    State(#[from] state::StateError),
}
