#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `cli` is the thin command-line front-end for `mseedship`. It parses the
//! argument surface with `clap`, initializes `tracing-subscriber` logging
//! keyed by `-q`/`-v`, builds the file inventory, restores transfer state,
//! wires the production collaborators (the miniSEED reader, the DataLink
//! transport and the optional selection filter) into a
//! [`session::TransferSession`], installs the signal shim, and turns the run
//! report into a process exit status.
//!
//! The crate exposes [`run`] as the primary entry point. It accepts an
//! iterator of arguments together with handles for standard output and
//! error, so binary-level behavior is testable without spawning a process.
//! [`run`] never panics; every failure surfaces as a diagnostic plus a
//! non-zero exit code.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use bandwidth::MaxRate;
use clap::{ArgAction, Parser};
use datalink::DataLinkClient;
use inventory::{FileInventory, InventoryBuilder};
use mseed::{MseedReader, Selections};
use session::{RunOutcome, RunReport, SelectionFilter, SessionConfig, TransferSession};
use state::StateFile;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod signals;
mod sync;

/// Ship miniSEED files to a DataLink server, resumably.
#[derive(Debug, Parser)]
#[command(name = "mseedship", version, about)]
struct Cli {
    /// DataLink server address.
    #[arg(value_name = "HOST:PORT")]
    server: String,

    /// Input files and directories; `@FILE` reads further paths from FILE.
    #[arg(value_name = "INPUT")]
    inputs: Vec<String>,

    /// Read input paths from a list file, one per line.
    #[arg(short = 'l', long = "list", value_name = "FILE")]
    lists: Vec<PathBuf>,

    /// State file recording per-file progress across runs.
    #[arg(short = 'S', long = "state", value_name = "FILE")]
    state: PathBuf,

    /// Directory recursion limit; negative values remove the bound.
    #[arg(
        short = 'r',
        long = "recurse",
        value_name = "LEVEL",
        default_value_t = -1,
        allow_hyphen_values = true
    )]
    recurse: i32,

    /// Selection file limiting which records are sent.
    #[arg(short = 's', long = "selections", value_name = "FILE")]
    selections: Option<PathBuf>,

    /// Maximum transmission rate in bits per second; K, M and G suffixes
    /// scale by 1000.
    #[arg(long = "max-rate", value_name = "RATE")]
    max_rate: Option<MaxRate>,

    /// Print periodic per-file transfer statistics.
    #[arg(short = 'I', long = "iostats")]
    iostats: bool,

    /// Seconds between statistics lines.
    #[arg(long = "iostats-interval", value_name = "SECONDS", default_value_t = 30)]
    iostats_interval: u64,

    /// Stop on the first connection or send error instead of reconnecting.
    #[arg(short = 'E', long = "quit-on-error")]
    quit_on_error: bool,

    /// Seconds to wait before reconnecting after a lost connection.
    #[arg(long = "reconnect", value_name = "SECONDS", default_value_t = 60)]
    reconnect: u64,

    /// Do not request per-record acknowledgements.
    #[arg(long = "no-ack")]
    no_ack: bool,

    /// Do not write a SYNC coverage file after sending data.
    #[arg(long = "no-sync")]
    no_sync: bool,

    /// Build and report the inventory without connecting or sending.
    #[arg(short = 'p', long = "pretend")]
    pretend: bool,

    /// Log warnings and errors only.
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    quiet: bool,

    /// Increase log detail; -v for debug, -vv for trace.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

/// Parses arguments, runs the transfer, and returns the process exit code.
///
/// `0` on normal completion or a clean signal stop, `1` on any fatal
/// condition, `2` on argument errors.
pub fn run<I, A, O, E>(args: I, stdout: &mut O, stderr: &mut E) -> i32
where
    I: IntoIterator<Item = A>,
    A: Into<OsString> + Clone,
    O: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(parse_error) => {
            let rendered = parse_error.render();
            if parse_error.use_stderr() {
                let _ = write!(stderr, "{rendered}");
            } else {
                let _ = write!(stdout, "{rendered}");
            }
            return parse_error.exit_code();
        }
    };

    init_logging(cli.quiet, cli.verbose);

    match execute(cli, stdout) {
        Ok(code) => code,
        Err(message) => {
            let _ = writeln!(stderr, "mseedship: {message}");
            1
        }
    }
}

/// Converts a numeric exit code into a [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, 255);
    std::process::ExitCode::from(clamped as u8)
}

fn execute<O: Write>(cli: Cli, stdout: &mut O) -> Result<i32, String> {
    let mut inventory = build_inventory(&cli)?;

    let state = StateFile::new(&cli.state);
    let restored = state
        .restore(&mut inventory)
        .map_err(|restore_error| restore_error.to_string())?;
    if restored > 0 {
        info!(entries = restored, "restored transfer state");
    }

    let filter = load_selections(&cli)?;

    if cli.pretend {
        report_inventory(&inventory, stdout);
        return Ok(0);
    }

    let config = SessionConfig {
        require_ack: !cli.no_ack,
        quit_on_error: cli.quit_on_error,
        reconnect_delay: Duration::from_secs(cli.reconnect),
        max_rate: cli.max_rate.unwrap_or_else(MaxRate::unlimited),
        io_stats_interval: cli
            .iostats
            .then(|| Duration::from_secs(cli.iostats_interval.max(1))),
    };

    let reader = MseedReader::new();
    let client_id = format!("mseedship:{}", std::process::id());
    let transport = DataLinkClient::new(&cli.server, client_id);

    let mut session = TransferSession::new(inventory, reader, transport, config).with_state(state);
    if let Some(filter) = filter {
        session = session.with_filter(filter);
    }

    signals::install(&session.stop_handle(), &session.dump_handle())
        .map_err(|signal_error| format!("cannot install signal handlers: {signal_error}"))?;

    let run_started = OffsetDateTime::now_utc();
    let report = session.run();
    let run_ended = OffsetDateTime::now_utc();

    if !cli.quiet {
        report_summary(&report, stdout);
    }

    if !cli.no_sync && !report.coverage.is_empty() {
        match sync::write_sync_file(std::path::Path::new("."), &report.coverage, run_started, run_ended) {
            Ok(path) => info!(path = %path.display(), "wrote SYNC file"),
            Err(sync_error) => error!(error = %sync_error, "error writing SYNC file"),
        }
    }

    match report.outcome {
        RunOutcome::Complete | RunOutcome::Interrupted => Ok(0),
        RunOutcome::Fatal(fatal) => Err(fatal.to_string()),
    }
}

fn build_inventory(cli: &Cli) -> Result<FileInventory, String> {
    let mut builder = InventoryBuilder::new().recursion_limit(cli.recurse);
    for input in &cli.inputs {
        builder = match input.strip_prefix('@') {
            Some(list) => builder.list_file(list),
            None => builder.path(input),
        };
    }
    for list in &cli.lists {
        builder = builder.list_file(list);
    }
    builder
        .build()
        .map_err(|build_error| build_error.to_string())
}

fn load_selections(cli: &Cli) -> Result<Option<Box<dyn SelectionFilter>>, String> {
    let Some(path) = &cli.selections else {
        return Ok(None);
    };
    let selections = Selections::load(path).map_err(|load_error| load_error.to_string())?;
    if selections.is_empty() {
        warn!(path = %path.display(), "selection file holds no criteria, sending everything");
        return Ok(None);
    }
    Ok(Some(Box::new(selections)))
}

/// Pretend-mode listing: what would be sent, without touching the network.
fn report_inventory<O: Write>(inventory: &FileInventory, stdout: &mut O) {
    let mut remaining = 0u64;
    for entry in inventory.iter() {
        let _ = writeln!(
            stdout,
            "{}\t{}\t{}",
            entry.path().display(),
            entry.offset(),
            entry.size()
        );
        remaining += entry.size() - entry.offset();
    }
    let _ = writeln!(
        stdout,
        "{} file(s), {} byte(s) remaining to send",
        inventory.len(),
        remaining
    );
}

fn report_summary<O: Write>(report: &RunReport, stdout: &mut O) {
    let elapsed = report.elapsed.as_secs_f64();
    if elapsed > 0.0 {
        let _ = writeln!(
            stdout,
            "Time elapsed: {elapsed:.1} seconds ({:.1} bytes/second, {:.1} records/second)",
            report.total_bytes as f64 / elapsed,
            report.total_records as f64 / elapsed
        );
    }
    let _ = writeln!(
        stdout,
        "Sent {} bytes in {} records from {} file(s)",
        report.total_bytes, report.total_records, report.total_files
    );
    if report.all_sent {
        let _ = writeln!(stdout, "All data transmitted.");
    }
}

fn init_logging(quiet: bool, verbose: u8) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
