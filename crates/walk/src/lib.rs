#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `walk` provides the deterministic directory enumeration used when
//! constructing transfer inventories. Native filesystem enumeration order is
//! unspecified and can differ between runs and platforms; [`SortedDir`] reads
//! a directory completely, sorts the entry names byte-wise, and yields them in
//! that fixed order so two enumerations of an unchanged directory always agree.
//!
//! # Design
//!
//! - [`SortedDir::open`] captures every entry name before the first one is
//!   yielded. Sorting requires the full set, so the enumerator cannot stream.
//! - Entries are held in an arena-backed doubly linked list and ordered with a
//!   bottom-up iterative merge sort: O(n log n) comparisons and no auxiliary
//!   array beyond the node arena itself.
//! - The comparator is plain byte-wise comparison of names and the merge is
//!   stable, so equal-ranked elements keep their relative order.
//! - Enumeration is restartable from scratch via [`SortedDir::iter`], never
//!   resumable mid-stream.
//!
//! # Errors
//!
//! Opening fails atomically: when the directory cannot be read, no partial
//! entry set is returned. Failures are reported as [`WalkError`] carrying the
//! offending path and the underlying [`io::Error`].

use std::error::Error;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Index of a node in the entry arena.
type NodeIndex = u32;

#[derive(Debug)]
struct Node {
    name: OsString,
    next: Option<NodeIndex>,
    prev: Option<NodeIndex>,
}

/// A directory listing with entries sorted by byte-wise name comparison.
///
/// The full entry set is captured at open time; later changes to the
/// directory are not observed.
#[derive(Debug)]
pub struct SortedDir {
    nodes: Vec<Node>,
    head: Option<NodeIndex>,
}

impl SortedDir {
    /// Reads and sorts the entries of `path`.
    ///
    /// `.` and `..` are excluded. The returned listing is finite and
    /// re-enumerable; call [`SortedDir::iter`] as many times as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalkError> {
        let path = path.as_ref().to_path_buf();
        let read_dir =
            fs::read_dir(&path).map_err(|error| WalkError::read_dir(path.clone(), error))?;

        let mut nodes: Vec<Node> = Vec::new();
        for entry in read_dir {
            let entry =
                entry.map_err(|error| WalkError::read_dir_entry(path.clone(), error))?;
            let name = entry.file_name();
            if name == OsStr::new(".") || name == OsStr::new("..") {
                continue;
            }

            let index = nodes.len() as NodeIndex;
            let prev = index.checked_sub(1);
            if let Some(prev) = prev {
                nodes[prev as usize].next = Some(index);
            }
            nodes.push(Node {
                name,
                next: None,
                prev,
            });
        }

        let head = if nodes.is_empty() { None } else { Some(0) };
        let mut dir = Self { nodes, head };
        dir.sort();
        Ok(dir)
    }

    /// Returns the number of entries captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the directory held no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the sorted entry names.
    #[must_use]
    pub fn iter(&self) -> SortedNames<'_> {
        SortedNames {
            dir: self,
            cursor: self.head,
        }
    }

    fn next_of(&self, index: Option<NodeIndex>) -> Option<NodeIndex> {
        index.and_then(|i| self.nodes[i as usize].next)
    }

    fn name_of(&self, index: NodeIndex) -> &[u8] {
        self.nodes[index as usize].name.as_encoded_bytes()
    }

    /// Bottom-up iterative merge sort over the linked entry list.
    ///
    /// Runs of size `insize` (starting at one, doubling each pass) are merged
    /// pairwise until a pass performs at most one merge. The merge takes the
    /// left run's element on ties, keeping the sort stable.
    fn sort(&mut self) {
        let mut insize: usize = 1;

        loop {
            let mut p = self.head.take();
            let mut tail: Option<NodeIndex> = None;
            let mut nmerges = 0usize;

            while p.is_some() {
                nmerges += 1;

                // Step `insize` places along from p to find the second run.
                let mut q = p;
                let mut psize = 0usize;
                for _ in 0..insize {
                    psize += 1;
                    q = self.next_of(q);
                    if q.is_none() {
                        break;
                    }
                }
                let mut qsize = insize;

                // Merge the two runs.
                while psize > 0 || (qsize > 0 && q.is_some()) {
                    // psize > 0 guarantees p points at a node, and the loop
                    // condition guarantees q does whenever psize == 0.
                    let from_p = match (p, q) {
                        _ if psize == 0 => false,
                        (_, None) => true,
                        _ if qsize == 0 => true,
                        (Some(pi), Some(qi)) => self.name_of(pi) <= self.name_of(qi),
                        (None, _) => false,
                    };

                    let e = if from_p {
                        let e = p;
                        p = self.next_of(p);
                        psize -= 1;
                        e
                    } else {
                        let e = q;
                        q = self.next_of(q);
                        qsize -= 1;
                        e
                    };

                    let e = match e {
                        Some(e) => e,
                        None => break,
                    };

                    if let Some(tail) = tail {
                        self.nodes[tail as usize].next = Some(e);
                    } else {
                        self.head = Some(e);
                    }
                    self.nodes[e as usize].prev = tail;
                    tail = Some(e);
                }

                // p has now stepped past both runs; q marks the next pair.
                p = q;
            }

            if let Some(tail) = tail {
                self.nodes[tail as usize].next = None;
            }

            // A pass with at most one merge leaves the list fully sorted.
            if nmerges <= 1 {
                return;
            }

            insize *= 2;
        }
    }
}

impl<'a> IntoIterator for &'a SortedDir {
    type Item = &'a OsStr;
    type IntoIter = SortedNames<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the sorted entry names of a [`SortedDir`].
#[derive(Debug)]
pub struct SortedNames<'a> {
    dir: &'a SortedDir,
    cursor: Option<NodeIndex>,
}

impl<'a> Iterator for SortedNames<'a> {
    type Item = &'a OsStr;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        self.cursor = self.dir.nodes[index as usize].next;
        Some(&self.dir.nodes[index as usize].name)
    }
}

/// Error returned when a directory cannot be enumerated.
#[derive(Debug)]
pub struct WalkError {
    kind: WalkErrorKind,
}

impl WalkError {
    fn read_dir(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::ReadDir { path, source },
        }
    }

    fn read_dir_entry(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::ReadDirEntry { path, source },
        }
    }

    /// Returns the specific failure that aborted enumeration.
    #[must_use]
    pub fn kind(&self) -> &WalkErrorKind {
        &self.kind
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WalkErrorKind::ReadDir { path, source } => {
                write!(
                    f,
                    "failed to read directory '{}': {}",
                    path.display(),
                    source
                )
            }
            WalkErrorKind::ReadDirEntry { path, source } => {
                write!(
                    f,
                    "failed to read entry in '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl Error for WalkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            WalkErrorKind::ReadDir { source, .. }
            | WalkErrorKind::ReadDirEntry { source, .. } => Some(source),
        }
    }
}

/// Classification of enumeration failures.
#[derive(Debug)]
pub enum WalkErrorKind {
    /// The directory itself could not be opened or read.
    ReadDir {
        /// Directory whose contents could not be read.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        source: io::Error,
    },
    /// An individual entry could not be obtained during iteration.
    ReadDirEntry {
        /// Directory containing the problematic entry.
        path: PathBuf,
        /// Underlying error emitted by the operating system.
        source: io::Error,
    },
}
