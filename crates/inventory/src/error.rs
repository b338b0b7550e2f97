use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error aborting inventory construction.
///
/// Any failure here is fatal for the whole build: sending a silently partial
/// input set is worse than refusing to start.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// An input path supplied by the caller does not exist or is unreadable.
    #[error("cannot access input path '{}': {source}", path.display())]
    RootInaccessible {
        /// The offending input path.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// An input path is neither a regular file nor a directory.
    #[error("'{}' is not a regular file or directory", path.display())]
    NotRegular {
        /// The offending input path.
        path: PathBuf,
    },

    /// A list file could not be opened or read.
    #[error("cannot read list file '{}': {source}", path.display())]
    ListFile {
        /// Path of the list file.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// Metadata for an entry discovered during a directory walk was
    /// unavailable.
    #[error("cannot inspect '{}': {source}", path.display())]
    Metadata {
        /// Path whose metadata could not be retrieved.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// A directory could not be enumerated mid-walk.
    #[error(transparent)]
    Walk(#[from] walk::WalkError),

    /// Construction finished without discovering any input file.
    #[error("no input files or directories were found")]
    Empty,
}
