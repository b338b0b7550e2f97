use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bandwidth::{interruptible_sleep, MaxRate, RateLimiter};
use inventory::FileInventory;
use state::StateFile;
use tracing::{debug, error, info, trace, warn};

use crate::collab::{ReadOutcome, RecordRead, SelectionFilter, Transport};
use crate::coverage::Coverage;
use crate::error::SessionError;

/// Tunable session policy.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Request per-record acknowledgements from the server.
    pub require_ack: bool,
    /// Terminate with an error on the first transport failure instead of
    /// reconnecting.
    pub quit_on_error: bool,
    /// Pause between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Optional throttle on the session-average transmission rate.
    pub max_rate: MaxRate,
    /// Interval for periodic per-file I/O statistics; `None` disables them.
    pub io_stats_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_ack: true,
            quit_on_error: false,
            reconnect_delay: Duration::from_secs(60),
            max_rate: MaxRate::unlimited(),
            io_stats_interval: None,
        }
    }
}

/// How a finished run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every inventory entry was processed.
    Complete,
    /// A stop signal ended the run early; state was saved cleanly.
    Interrupted,
    /// A fatal condition aborted the run.
    Fatal(SessionError),
}

impl RunOutcome {
    /// Returns `true` when the run should map to a non-zero exit status.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Summary of a completed run, printed by the caller and used to derive the
/// process exit status.
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Bytes confirmed sent during this run.
    pub total_bytes: u64,
    /// Records confirmed sent during this run.
    pub total_records: u64,
    /// Files fully processed during this run.
    pub total_files: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Whether every inventory entry reached `offset == size`.
    pub all_sent: bool,
    /// Union of time ranges sent, for the coverage listing.
    pub coverage: Coverage,
}

enum StreamEnd {
    Complete,
    Interrupted,
    Restart(crate::collab::TransportError),
    Fatal(SessionError),
}

enum FileEnd {
    Done,
    Skipped,
    Interrupted,
    Restart(crate::collab::TransportError),
    Fatal(SessionError),
}

/// The transfer state machine.
///
/// Owns the inventory, the collaborators, and the session-lifetime counters.
/// Single-threaded: one file is current at a time and nothing else mutates
/// the inventory while the session runs.
pub struct TransferSession<R, T> {
    inventory: FileInventory,
    reader: R,
    transport: T,
    filter: Option<Box<dyn SelectionFilter>>,
    state: Option<StateFile>,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    dump: Arc<AtomicBool>,
    limiter: Option<RateLimiter>,
    total_bytes: u64,
    total_records: u64,
    total_files: u64,
    coverage: Coverage,
}

impl<R: RecordRead, T: Transport> TransferSession<R, T> {
    /// Creates a session over an already-restored inventory.
    #[must_use]
    pub fn new(inventory: FileInventory, reader: R, transport: T, config: SessionConfig) -> Self {
        Self {
            inventory,
            reader,
            transport,
            filter: None,
            state: None,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            dump: Arc::new(AtomicBool::new(false)),
            limiter: None,
            total_bytes: 0,
            total_records: 0,
            total_files: 0,
            coverage: Coverage::default(),
        }
    }

    /// Installs a selection filter consulted before each send.
    #[must_use]
    pub fn with_filter(mut self, filter: Box<dyn SelectionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Installs the state file persisted after each file and at termination.
    #[must_use]
    pub fn with_state(mut self, state: StateFile) -> Self {
        self.state = Some(state);
        self
    }

    /// Flag that requests a clean stop when set; shared with the signal shim.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Flag that requests an inventory dump to stderr when set.
    #[must_use]
    pub fn dump_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dump)
    }

    /// Runs the session to completion and reports the result.
    ///
    /// Never panics on transfer failures; every ending, fatal or not, still
    /// persists final state and yields a summary.
    pub fn run(mut self) -> RunReport {
        let started = Instant::now();
        self.limiter = self.config.max_rate.to_limiter();

        let mut cursor = 0usize;
        let mut outcome = self.drive(&mut cursor);

        // One last snapshot regardless of how the run ended.
        if let Err(save_error) = self.save_state() {
            error!(error = %save_error, "final state save failed");
            if !outcome.is_fatal() {
                outcome = RunOutcome::Fatal(save_error.into());
            }
        }

        RunReport {
            outcome,
            total_bytes: self.total_bytes,
            total_records: self.total_records,
            total_files: self.total_files,
            elapsed: started.elapsed(),
            all_sent: self.inventory.all_sent(),
            coverage: self.coverage,
        }
    }

    fn drive(&mut self, cursor: &mut usize) -> RunOutcome {
        loop {
            if self.stopped() {
                return RunOutcome::Interrupted;
            }

            match self.transport.connect() {
                Ok(info) => {
                    if !info.writable {
                        error!(endpoint = %info.endpoint, "write permission not granted");
                        return RunOutcome::Fatal(SessionError::WriteRefused {
                            endpoint: info.endpoint,
                        });
                    }
                    info!(endpoint = %info.endpoint, "connected");
                }
                Err(error) => {
                    error!(error = %error, "error connecting to server");
                    if self.config.quit_on_error {
                        return RunOutcome::Fatal(error.into());
                    }
                    if !self.reconnect_pause() {
                        return RunOutcome::Interrupted;
                    }
                    continue;
                }
            }

            match self.stream_files(cursor) {
                StreamEnd::Complete => {
                    self.transport.disconnect();
                    return RunOutcome::Complete;
                }
                StreamEnd::Interrupted => {
                    self.transport.disconnect();
                    return RunOutcome::Interrupted;
                }
                StreamEnd::Fatal(error) => {
                    self.transport.disconnect();
                    return RunOutcome::Fatal(error);
                }
                StreamEnd::Restart(error) => {
                    self.transport.disconnect();
                    if self.config.quit_on_error {
                        return RunOutcome::Fatal(error.into());
                    }
                    if !self.reconnect_pause() {
                        return RunOutcome::Interrupted;
                    }
                }
            }
        }
    }

    /// Sequentially sends the remaining portion of every file.
    fn stream_files(&mut self, cursor: &mut usize) -> StreamEnd {
        loop {
            if self.stopped() {
                return StreamEnd::Interrupted;
            }
            self.maybe_dump();

            let Some(entry) = self.inventory.get(*cursor) else {
                return StreamEnd::Complete;
            };

            // Already sent as of current knowledge, nothing to do.
            if entry.is_complete() {
                *cursor += 1;
                continue;
            }

            match self.send_file(*cursor) {
                FileEnd::Done | FileEnd::Skipped => {
                    if let Err(error) = self.save_state() {
                        return StreamEnd::Fatal(error.into());
                    }
                    self.total_files += 1;
                    *cursor += 1;
                }
                FileEnd::Interrupted => return StreamEnd::Interrupted,
                FileEnd::Restart(error) => return StreamEnd::Restart(error),
                FileEnd::Fatal(error) => return StreamEnd::Fatal(error),
            }
        }
    }

    /// Sends records from one file starting at its current offset.
    fn send_file(&mut self, index: usize) -> FileEnd {
        let (path, size) = match self.inventory.get(index) {
            Some(entry) => (entry.path().to_path_buf(), entry.size()),
            None => return FileEnd::Done,
        };

        debug!(path = %path.display(), "sending records from file");

        let file_started = Instant::now();
        let mut stats_deadline = self.config.io_stats_interval.map(|i| file_started + i);
        let mut run_bytes = 0u64;
        let mut run_records = 0u64;

        loop {
            if self.stopped() {
                return FileEnd::Interrupted;
            }
            self.maybe_dump();

            let offset = match self.inventory.get(index) {
                Some(entry) => entry.offset(),
                None => return FileEnd::Done,
            };

            let outcome = match self.reader.read_at(&path, offset) {
                Ok(outcome) => outcome,
                Err(source) => {
                    return FileEnd::Fatal(SessionError::Read { path, source });
                }
            };

            match outcome {
                ReadOutcome::EndOfStream => {
                    if offset < size {
                        warn!(
                            path = %path.display(),
                            trailing = size - offset,
                            "end of records before end of file, trailing bytes ignored"
                        );
                    }
                    if let Some(entry) = self.inventory.get_mut(index) {
                        entry.mark_complete();
                    }
                    self.log_file_summary(&path, run_bytes, run_records, file_started);
                    return FileEnd::Done;
                }
                ReadOutcome::NotRecognized => {
                    let progressed = self
                        .inventory
                        .get(index)
                        .is_some_and(|e| e.offset() > 0 || e.bytes_sent() > 0);
                    if progressed {
                        return FileEnd::Fatal(SessionError::Corrupt {
                            path,
                            offset,
                            detail: "unrecognized data after partial progress".to_owned(),
                        });
                    }
                    warn!(path = %path.display(), "no recognized records found, skipping");
                    if let Some(entry) = self.inventory.get_mut(index) {
                        entry.mark_skipped();
                    }
                    return FileEnd::Skipped;
                }
                ReadOutcome::Corrupt { detail } => {
                    return FileEnd::Fatal(SessionError::Corrupt {
                        path,
                        offset,
                        detail,
                    });
                }
                ReadOutcome::Record(record) => {
                    let len = record.len();

                    if let Some(filter) = self.filter.as_deref() {
                        if !filter.matches(&record.stream_id, record.start_time, record.end_time)
                        {
                            trace!(stream = %record.stream_id, "record rejected by selection");
                            if let Some(entry) = self.inventory.get_mut(index) {
                                entry.advance_unsent(len);
                            }
                            continue;
                        }
                    }

                    if let Some(limiter) = &self.limiter {
                        let delay = limiter.required_delay(self.total_bytes + len);
                        if !delay.is_zero() {
                            trace!(?delay, "throttling");
                            if !interruptible_sleep(delay, &self.stop) {
                                return FileEnd::Interrupted;
                            }
                        }
                    }

                    trace!(stream = %record.stream_id, offset, "sending record");
                    if let Err(error) = self.transport.send(&record, self.config.require_ack) {
                        error!(error = %error, "error sending record");
                        return FileEnd::Restart(error);
                    }

                    if let Some(entry) = self.inventory.get_mut(index) {
                        entry.advance(len);
                    }
                    self.total_bytes += len;
                    self.total_records += 1;
                    run_bytes += len;
                    run_records += 1;
                    self.coverage
                        .add(&record.stream_id, record.start_time, record.end_time);

                    if let (Some(deadline), Some(interval)) =
                        (stats_deadline.as_mut(), self.config.io_stats_interval)
                    {
                        let now = Instant::now();
                        if now >= *deadline {
                            self.log_file_progress(index, run_bytes, run_records, file_started);
                            while *deadline <= now {
                                *deadline += interval;
                            }
                        }
                    }
                }
            }
        }
    }

    fn log_file_progress(
        &self,
        index: usize,
        run_bytes: u64,
        run_records: u64,
        file_started: Instant,
    ) {
        let Some(entry) = self.inventory.get(index) else {
            return;
        };
        let elapsed = file_started.elapsed().as_secs_f64();
        let percent = if entry.size() == 0 {
            100.0
        } else {
            100.0 * entry.bytes_sent() as f64 / entry.size() as f64
        };
        let byte_rate = if elapsed > 0.0 {
            run_bytes as f64 / elapsed
        } else {
            0.0
        };
        let record_rate = if elapsed > 0.0 {
            run_records as f64 / elapsed
        } else {
            0.0
        };
        info!(
            path = %entry.path().display(),
            "sent {percent:.0}% ({byte_rate:.1} bytes/second, {record_rate:.1} records/second)"
        );
    }

    fn log_file_summary(
        &self,
        path: &std::path::Path,
        run_bytes: u64,
        run_records: u64,
        file_started: Instant,
    ) {
        info!(
            path = %path.display(),
            "sent {run_bytes} bytes in {run_records} records"
        );
        if self.config.io_stats_interval.is_some() {
            let elapsed = file_started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                info!(
                    path = %path.display(),
                    "sent in {elapsed:.1} seconds ({:.1} bytes/second, {:.1} records/second)",
                    run_bytes as f64 / elapsed,
                    run_records as f64 / elapsed
                );
            }
        }
    }

    fn save_state(&self) -> Result<(), state::StateError> {
        match &self.state {
            Some(state) => state.save(&self.inventory),
            None => Ok(()),
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Prints the inventory table to stderr when the dump flag was raised.
    fn maybe_dump(&mut self) {
        if !self.dump.swap(false, Ordering::Relaxed) {
            return;
        }
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "path\toffset\tsize\tbytecount\trecordcount");
        let _ = state::write_snapshot(&mut handle, &self.inventory);
    }

    /// Sleeps the reconnect delay; returns `false` when interrupted.
    fn reconnect_pause(&self) -> bool {
        info!(
            seconds = self.config.reconnect_delay.as_secs(),
            "reconnecting after delay"
        );
        interruptible_sleep(self.config.reconnect_delay, &self.stop)
    }
}
