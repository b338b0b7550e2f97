#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `inventory` builds and owns the authoritative ordered list of input files
//! for a transfer run. Discovery order is fully deterministic: inputs are
//! processed in the order they were supplied, list files expand line by line,
//! and directory contents are enumerated through [`walk::SortedDir`] so the
//! same input set always produces the same inventory, across restarts and
//! platforms. That stability is what makes path-based state restoration safe
//! without tracking file identity.
//!
//! Duplicate paths are intentionally not deduplicated; supplying overlapping
//! roots is a caller error.

mod builder;
mod entry;
mod error;

pub use builder::InventoryBuilder;
pub use entry::FileEntry;
pub use error::InventoryError;

/// Ordered sequence of [`FileEntry`] values, insertion order = discovery order.
#[derive(Debug, Default)]
pub struct FileInventory {
    entries: Vec<FileEntry>,
}

impl FileInventory {
    pub(crate) fn push(&mut self, entry: FileEntry) {
        self.entries.push(entry);
    }

    /// Returns the number of files in the inventory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no files were discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    /// Returns a mutable reference to the entry at `index`, if present.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut FileEntry> {
        self.entries.get_mut(index)
    }

    /// Iterates over the entries in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    /// Iterates mutably over the entries in discovery order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileEntry> {
        self.entries.iter_mut()
    }

    /// Total size of all input files at discovery time.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(FileEntry::size).sum()
    }

    /// Returns `true` when every file has been sent completely.
    #[must_use]
    pub fn all_sent(&self) -> bool {
        self.entries.iter().all(FileEntry::is_complete)
    }
}

impl<'a> IntoIterator for &'a FileInventory {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
