#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `state` persists per-file transfer progress so an interrupted run resumes
//! exactly where it stopped. The on-disk format is newline-delimited text,
//! one file per line:
//!
//! ```text
//! path\toffset\tsize\tbytecount\trecordcount
//! ```
//!
//! with all integers in base 10. The path comes first and may not contain a
//! literal tab or newline.
//!
//! # Crash consistency
//!
//! [`StateFile::save`] writes the whole inventory snapshot to a temporary
//! file in the same directory, syncs it, and atomically renames it over the
//! target. A process killed mid-save leaves the previously committed state
//! byte-for-byte unchanged.
//!
//! # Restore
//!
//! [`StateFile::restore`] matches each persisted line back onto the inventory
//! by exact path equality, taking the first entry whose offset is still zero
//! so re-running restore is idempotent. A persisted path with no inventory
//! counterpart is a hard error: the caller pointed the tool at a different
//! input set or state file than before. A size mismatch is only a warning
//! (the file may have grown); the persisted offset is still honored. A
//! missing state file is an ordinary cold start.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use inventory::FileInventory;
use memchr::memchr;
use thiserror::Error;
use tracing::{debug, warn};

/// Handle on the durable state file location.
#[derive(Clone, Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Creates a handle for the given state-file path.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state-file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a whole-inventory snapshot, atomically replacing any previous
    /// state file.
    pub fn save(&self, inventory: &FileInventory) -> Result<(), StateError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        debug!(path = %self.path.display(), "saving state");

        let file = fs::File::create(&tmp).map_err(|source| StateError::Create {
            path: tmp.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        write_snapshot(&mut writer, inventory).map_err(|source| StateError::Write {
            path: tmp.clone(),
            source,
        })?;
        let file = writer
            .into_inner()
            .map_err(|source| StateError::Write {
                path: tmp.clone(),
                source: source.into_error(),
            })?;
        file.sync_all().map_err(|source| StateError::Write {
            path: tmp.clone(),
            source,
        })?;

        fs::rename(&tmp, &self.path).map_err(|source| StateError::Rename {
            from: tmp,
            to: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Restores persisted progress onto matching inventory entries.
    ///
    /// Returns the number of persisted records applied. A missing state file
    /// restores nothing and returns zero.
    pub fn restore(&self, inventory: &mut FileInventory) -> Result<usize, StateError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, cold start");
                return Ok(0);
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut matched = 0;
        for (lineno, line) in data.split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let record = match parse_line(line) {
                Some(record) => record,
                None => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        "could not parse state file line"
                    );
                    continue;
                }
            };

            if self.apply(inventory, &record)? {
                matched += 1;
            }
        }

        debug!(matched, "state restored");
        Ok(matched)
    }

    /// Applies one persisted record; returns whether an entry was updated.
    fn apply(
        &self,
        inventory: &mut FileInventory,
        record: &PersistedRecord,
    ) -> Result<bool, StateError> {
        let mut seen_path = false;
        for entry in inventory.iter_mut() {
            if entry.path() != record.path {
                continue;
            }
            seen_path = true;

            // First-match-wins: entries already carrying progress were
            // restored by an earlier line.
            if entry.offset() != 0 {
                continue;
            }

            if entry.size() != record.size {
                warn!(
                    path = %record.path.display(),
                    persisted = record.size,
                    current = entry.size(),
                    "size has changed since last execution"
                );
            }

            entry.restore(record.offset, record.bytes_sent, record.records_sent);
            return Ok(true);
        }

        if seen_path {
            return Ok(false);
        }

        Err(StateError::UnknownPath {
            state_file: self.path.clone(),
            path: record.path.clone(),
        })
    }
}

/// One parsed state-file line.
#[derive(Debug)]
struct PersistedRecord {
    path: PathBuf,
    offset: u64,
    size: u64,
    bytes_sent: u64,
    records_sent: u64,
}

/// Writes the snapshot lines for every inventory entry.
///
/// Shared by [`StateFile::save`] and the status-dump output so both always
/// agree on the format.
pub fn write_snapshot<W: Write>(writer: &mut W, inventory: &FileInventory) -> io::Result<()> {
    for entry in inventory {
        writer.write_all(path_bytes(entry.path()))?;
        writeln!(
            writer,
            "\t{}\t{}\t{}\t{}",
            entry.offset(),
            entry.size(),
            entry.bytes_sent(),
            entry.records_sent()
        )?;
    }
    writer.flush()
}

fn parse_line(line: &[u8]) -> Option<PersistedRecord> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let tab = memchr(b'\t', line)?;
    let (path, rest) = line.split_at(tab);
    let mut fields = rest[1..].split(|&b| b == b'\t');

    let offset = parse_u64(fields.next()?)?;
    let size = parse_u64(fields.next()?)?;
    let bytes_sent = parse_u64(fields.next()?)?;
    let records_sent = parse_u64(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }

    Some(PersistedRecord {
        path: path_from_bytes(path)?,
        offset,
        size,
        bytes_sent,
        records_sent,
    })
}

fn parse_u64(field: &[u8]) -> Option<u64> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(OsString::from_vec(bytes.to_vec())))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    Some(PathBuf::from(std::str::from_utf8(bytes).ok()?))
}

/// Error reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// The temporary state file could not be created.
    #[error("cannot create temporary state file '{}': {source}", path.display())]
    Create {
        /// Temporary file path.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// Writing or syncing the temporary state file failed.
    #[error("cannot write state file '{}': {source}", path.display())]
    Write {
        /// Temporary file path.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// The atomic rename onto the target failed.
    #[error("cannot rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        /// Temporary file path.
        from: PathBuf,
        /// Final state-file path.
        to: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// The existing state file could not be read.
    #[error("cannot read state file '{}': {source}", path.display())]
    Read {
        /// State-file path.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        #[source]
        source: io::Error,
    },

    /// The state file references a path absent from the current inventory.
    #[error(
        "state file '{}' references '{}' which is not in the current input set",
        state_file.display(),
        path.display()
    )]
    UnknownPath {
        /// State-file path.
        state_file: PathBuf,
        /// The unmatched persisted path.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory::InventoryBuilder;
    use std::fs;

    fn fixture(sizes: &[(&str, usize)]) -> (tempfile::TempDir, FileInventory) {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut builder = InventoryBuilder::new();
        for (name, size) in sizes {
            let path = temp.path().join(name);
            fs::write(&path, vec![0u8; *size]).expect("write");
            builder = builder.path(path);
        }
        let inventory = builder.build().expect("build inventory");
        (temp, inventory)
    }

    #[test]
    fn save_then_restore_round_trips() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 1024), ("b.mseed", 512)]);
        inventory.get_mut(0).expect("entry").restore(512, 512, 1);

        let state = StateFile::new(temp.path().join("shipping.state"));
        state.save(&inventory).expect("save");

        let mut fresh = InventoryBuilder::new()
            .path(inventory.get(0).expect("e").path())
            .path(inventory.get(1).expect("e").path())
            .build()
            .expect("rebuild");
        let matched = state.restore(&mut fresh).expect("restore");

        assert_eq!(matched, 2);
        let first = fresh.get(0).expect("entry");
        assert_eq!(first.offset(), 512);
        assert_eq!(first.bytes_sent(), 512);
        assert_eq!(first.records_sent(), 1);
        assert_eq!(fresh.get(1).expect("entry").offset(), 0);
    }

    #[test]
    fn missing_state_file_is_cold_start() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 10)]);
        let state = StateFile::new(temp.path().join("absent.state"));
        assert_eq!(state.restore(&mut inventory).expect("restore"), 0);
    }

    #[test]
    fn unknown_persisted_path_is_a_hard_error() {
        let (temp, inventory) = fixture(&[("a.mseed", 10)]);
        let state = StateFile::new(temp.path().join("shipping.state"));
        state.save(&inventory).expect("save");

        let other = temp.path().join("other.mseed");
        fs::write(&other, b"xxxxxxxxxx").expect("write");
        let mut different = InventoryBuilder::new().path(&other).build().expect("build");

        let error = state
            .restore(&mut different)
            .expect_err("mismatched input set must fail");
        assert!(matches!(error, StateError::UnknownPath { .. }));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 10)]);
        let path = temp.path().join("shipping.state");
        let entry_path = inventory.get(0).expect("e").path().to_path_buf();
        fs::write(
            &path,
            format!(
                "garbage without tabs\n{}\t4\t10\t4\t1\n",
                entry_path.display()
            ),
        )
        .expect("write");

        let state = StateFile::new(&path);
        assert_eq!(state.restore(&mut inventory).expect("restore"), 1);
        assert_eq!(inventory.get(0).expect("e").offset(), 4);
    }

    #[test]
    fn restore_is_idempotent() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 10)]);
        inventory.get_mut(0).expect("e").restore(4, 4, 1);
        let state = StateFile::new(temp.path().join("shipping.state"));
        state.save(&inventory).expect("save");

        assert_eq!(state.restore(&mut inventory).expect("first"), 0);
        assert_eq!(inventory.get(0).expect("e").offset(), 4);
    }

    #[test]
    fn interrupted_save_leaves_committed_state_intact() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 10)]);
        let state = StateFile::new(temp.path().join("shipping.state"));
        state.save(&inventory).expect("save");
        let committed = fs::read(state.path()).expect("read");

        // Simulate a crash mid-save: a half-written temp file next to the
        // committed state must not affect it.
        fs::write(temp.path().join("shipping.state.tmp"), b"partial garb").expect("write");
        assert_eq!(fs::read(state.path()).expect("read"), committed);

        // The next successful save replaces both cleanly.
        inventory.get_mut(0).expect("e").restore(4, 4, 1);
        state.save(&inventory).expect("save again");
        assert_ne!(fs::read(state.path()).expect("read"), committed);
    }

    #[test]
    fn size_mismatch_still_restores_offset() {
        let (temp, mut inventory) = fixture(&[("a.mseed", 10)]);
        let entry_path = inventory.get(0).expect("e").path().to_path_buf();
        let path = temp.path().join("shipping.state");
        // Persisted size differs from the current 10 bytes.
        fs::write(&path, format!("{}\t4\t8\t4\t1\n", entry_path.display())).expect("write");

        let state = StateFile::new(&path);
        assert_eq!(state.restore(&mut inventory).expect("restore"), 1);
        assert_eq!(inventory.get(0).expect("e").offset(), 4);
    }
}
