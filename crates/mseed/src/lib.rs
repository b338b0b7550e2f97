#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `mseed` supplies the production collaborators for the transfer session:
//! a reader that frames miniSEED 2 records out of input files, and the
//! selection filter loaded from a criteria file.
//!
//! The reader is deliberately minimal. It validates the fixed 48-byte
//! header, takes the record length from Blockette 1000, and derives the
//! stream identifier and logical time range; it never decodes sample data.
//! Anything that does not look like a record is reported as unrecognized so
//! the session can decide between skipping the file and aborting.

mod reader;
mod selection;

pub use reader::MseedReader;
pub use selection::{SelectionError, Selections};
