//! SYNC coverage file writer.
//!
//! After a run that sent data, a `start--end.sync` file is written to the
//! working directory: a `DCC|year,doy` header line, then one
//! `net|sta|loc|chan|earliest|latest` line per contiguous span sent.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use session::{Coverage, HpTime};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const NAME_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const SEED_TIME_FORMAT: &[FormatItem<'_>] =
    format_description!("[year],[ordinal],[hour]:[minute]:[second].[subsecond digits:6]");

/// Writes the coverage listing into `dir`, returning the path of the
/// created file.
pub fn write_sync_file(
    dir: &Path,
    coverage: &Coverage,
    run_started: OffsetDateTime,
    run_ended: OffsetDateTime,
) -> io::Result<PathBuf> {
    let name = format!(
        "{}--{}.sync",
        format_stamp(run_started, NAME_FORMAT)?,
        format_stamp(run_ended, NAME_FORMAT)?
    );
    let path = dir.join(name);

    let mut writer = BufWriter::new(File::create(&path)?);

    let now = OffsetDateTime::now_utc();
    let yearday = format!("{:04},{:03}", now.year(), now.ordinal());
    writeln!(writer, "DCC|{yearday}")?;

    for (stream_id, spans) in coverage.iter() {
        let fields = stream_fields(stream_id);
        for span in spans {
            writeln!(
                writer,
                "{}|{}|{}",
                fields,
                format_hptime(span.start)?,
                format_hptime(span.end)?
            )?;
        }
    }

    writer.flush()?;
    Ok(path)
}

/// Splits `NET_STA_LOC_CHAN/MSEED` into pipe-separated SYNC fields.
///
/// Ids that do not follow the four-field convention pass through verbatim
/// in the first field.
fn stream_fields(stream_id: &str) -> String {
    let bare = stream_id.split('/').next().unwrap_or(stream_id);
    let parts: Vec<&str> = bare.split('_').collect();
    match parts.as_slice() {
        [net, sta, loc, chan] => format!("{net}|{sta}|{loc}|{chan}"),
        _ => format!("{bare}|||"),
    }
}

fn format_hptime(micros: HpTime) -> io::Result<String> {
    let stamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(io::Error::other)?;
    format_stamp(stamp, SEED_TIME_FORMAT)
}

fn format_stamp(stamp: OffsetDateTime, format: &[FormatItem<'_>]) -> io::Result<String> {
    stamp.format(format).map_err(io::Error::other)
}
