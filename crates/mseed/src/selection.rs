use std::fs;
use std::io;
use std::path::Path;

use session::{HpTime, SelectionFilter};
use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::debug;

const TIME_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Errors raised while loading a selection file.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The selection file could not be read.
    #[error("cannot read selection file {path}: {source}")]
    Read {
        /// Path of the selection file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A line in the selection file could not be parsed.
    #[error("selection file {path} line {line}: {detail}")]
    Parse {
        /// Path of the selection file.
        path: String,
        /// One-based line number.
        line: usize,
        /// What was wrong with the line.
        detail: String,
    },
}

struct Selection {
    pattern: String,
    start_time: Option<HpTime>,
    end_time: Option<HpTime>,
}

/// Record selection criteria loaded from a file.
///
/// Each non-comment line holds a stream id pattern with `*` and `?`
/// wildcards, optionally followed by a start time and an end time in
/// `YYYY-MM-DDTHH:MM:SS` form. A record is sent when any line's pattern
/// matches its stream id and the time windows overlap; omitted times leave
/// that side of the window open.
pub struct Selections {
    entries: Vec<Selection>,
}

impl Selections {
    /// Loads selection criteria from `path`.
    pub fn load(path: &Path) -> Result<Self, SelectionError> {
        let text = fs::read_to_string(path).map_err(|source| SelectionError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut entries = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let pattern = match fields.next() {
                Some(pattern) => pattern.to_owned(),
                None => continue,
            };
            let start_time = fields
                .next()
                .map(|text| parse_time(path, index + 1, text))
                .transpose()?;
            let end_time = fields
                .next()
                .map(|text| parse_time(path, index + 1, text))
                .transpose()?;
            if let Some(extra) = fields.next() {
                return Err(SelectionError::Parse {
                    path: path.display().to_string(),
                    line: index + 1,
                    detail: format!("unexpected trailing field {extra:?}"),
                });
            }
            entries.push(Selection {
                pattern,
                start_time,
                end_time,
            });
        }

        debug!(path = %path.display(), entries = entries.len(), "loaded selections");
        Ok(Self { entries })
    }

    /// Returns `true` when the file held no usable criteria.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SelectionFilter for Selections {
    fn matches(&self, stream_id: &str, start_time: HpTime, end_time: HpTime) -> bool {
        // Patterns normally name the bare stream, not the record suffix.
        let bare = stream_id.split('/').next().unwrap_or(stream_id);
        self.entries.iter().any(|sel| {
            let id_match = glob_match(sel.pattern.as_bytes(), bare.as_bytes())
                || glob_match(sel.pattern.as_bytes(), stream_id.as_bytes());
            id_match
                && sel.start_time.map_or(true, |sel_start| end_time >= sel_start)
                && sel.end_time.map_or(true, |sel_end| start_time <= sel_end)
        })
    }
}

fn parse_time(path: &Path, line: usize, text: &str) -> Result<HpTime, SelectionError> {
    let parsed =
        PrimitiveDateTime::parse(text, TIME_FORMAT).map_err(|err| SelectionError::Parse {
            path: path.display().to_string(),
            line,
            detail: format!("bad time {text:?}: {err}"),
        })?;
    let nanos = parsed.assume_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000).map_err(|_| SelectionError::Parse {
        path: path.display().to_string(),
        line,
        detail: format!("time {text:?} out of range"),
    })
}

/// Matches `text` against `pattern` where `*` spans any run of bytes and
/// `?` matches exactly one.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => match text.split_first() {
            Some((_, tail)) => glob_match(rest, tail),
            None => false,
        },
        Some((&byte, rest)) => match text.split_first() {
            Some((&head, tail)) => head == byte && glob_match(rest, tail),
            None => false,
        },
    }
}
