#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `session` drives the resumable transfer itself: it owns the connection
//! lifecycle, walks the file inventory sequentially, reads records through a
//! [`RecordRead`] collaborator, ships them through a [`Transport`]
//! collaborator, and persists progress through a state file so a restart
//! resumes exactly where the previous run stopped.
//!
//! # State machine
//!
//! ```text
//! Connecting -> Streaming -> (Reconnecting -> Connecting) -> Terminated
//! ```
//!
//! Connect failures and send failures move the session to `Reconnecting`
//! (after an interruptible delay) unless quit-on-error is set. Progress
//! counters only ever advance after the transport confirmed a record, so a
//! crash can lose at most the in-memory delta since the last state save,
//! never corrupt the on-disk state.
//!
//! # Cancellation
//!
//! A stop flag shared with the signal shim is checked between records,
//! between files, and inside every sleep; a status-dump flag prints the
//! inventory table on demand.

mod collab;
mod coverage;
mod error;
mod run;

pub use collab::{
    HpTime, ReadOutcome, Record, RecordRead, SelectionFilter, ServerInfo, Transport,
    TransportError,
};
pub use coverage::{Coverage, Span};
pub use error::SessionError;
pub use run::{RunOutcome, RunReport, SessionConfig, TransferSession};
