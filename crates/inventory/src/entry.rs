use std::path::{Path, PathBuf};

/// One input file with its transfer progress counters.
///
/// The path and discovery-time size never change after construction. The
/// offset advances monotonically within a run and always satisfies
/// `0 <= offset <= size`; `offset == size` means the file is fully sent as of
/// current knowledge.
#[derive(Clone, Debug)]
pub struct FileEntry {
    path: PathBuf,
    size: u64,
    offset: u64,
    bytes_sent: u64,
    records_sent: u64,
    skipped: bool,
}

impl FileEntry {
    pub(crate) fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            offset: 0,
            bytes_sent: 0,
            records_sent: 0,
            skipped: false,
        }
    }

    /// Path used to open the file and to match persisted state.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total byte size captured when the file was discovered.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Current read/send offset.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Cumulative bytes confirmed sent from this file.
    #[must_use]
    pub const fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Cumulative records confirmed sent from this file.
    #[must_use]
    pub const fn records_sent(&self) -> u64 {
        self.records_sent
    }

    /// Returns `true` when the file content failed validation and the file
    /// was permanently skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Returns `true` when `offset == size`.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.offset == self.size
    }

    /// Advances the offset past one confirmed-sent record.
    ///
    /// Only called after the transport acknowledged the bytes; a failed send
    /// never earns partial credit.
    pub fn advance(&mut self, record_len: u64) {
        debug_assert!(self.offset + record_len <= self.size);
        self.offset += record_len;
        self.bytes_sent += record_len;
        self.records_sent += 1;
    }

    /// Advances the offset past a record that was read but deliberately not
    /// sent (rejected by the selection filter). Sent-byte accounting is
    /// untouched.
    pub fn advance_unsent(&mut self, record_len: u64) {
        debug_assert!(self.offset + record_len <= self.size);
        self.offset += record_len;
    }

    /// Marks content that failed validation with zero progress as permanently
    /// skipped, consuming the whole file.
    pub fn mark_skipped(&mut self) {
        self.skipped = true;
        self.offset = self.size;
    }

    /// Marks the file fully consumed after a clean end of stream.
    pub fn mark_complete(&mut self) {
        self.offset = self.size;
    }

    /// Applies progress restored from a persisted state record.
    pub fn restore(&mut self, offset: u64, bytes_sent: u64, records_sent: u64) {
        self.offset = offset.min(self.size);
        self.bytes_sent = bytes_sent;
        self.records_sent = records_sent;
    }
}
