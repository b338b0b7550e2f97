use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use session::{HpTime, ReadOutcome, Record, RecordRead};
use time::{Date, PrimitiveDateTime, Time};
use tracing::trace;

/// Fixed data header length of a miniSEED 2 record.
const FIXED_HEADER_LEN: u64 = 48;

/// Bytes examined when locating Blockette 1000. Blockettes directly follow
/// the fixed header, well within the smallest legal record.
const PROBE_LEN: u64 = 256;

/// Record length sanity bounds: 2^7 (128) through 2^20 (1 MiB).
const MIN_RECLEN_POWER: u8 = 7;
const MAX_RECLEN_POWER: u8 = 20;

/// Frames miniSEED 2 records out of input files.
///
/// The open file handle is cached between calls so sequential reads of the
/// same file do not reopen it; any change of path or backwards seek simply
/// reopens. Resuming at an offset previously reported as a record boundary
/// is exact by construction, the reader only ever looks at `offset`.
#[derive(Debug, Default)]
pub struct MseedReader {
    current: Option<(PathBuf, File, u64)>,
}

impl MseedReader {
    /// Creates a reader with no file open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&mut self, path: &Path) -> io::Result<(&mut File, u64)> {
        let reopen = match &self.current {
            Some((cached, _, _)) => cached != path,
            None => true,
        };
        if reopen {
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            self.current = Some((path.to_path_buf(), file, len));
        }
        match &mut self.current {
            Some((_, file, len)) => Ok((file, *len)),
            None => Err(io::Error::other("reader cache invariant broken")),
        }
    }
}

impl RecordRead for MseedReader {
    fn read_at(&mut self, path: &Path, offset: u64) -> io::Result<ReadOutcome> {
        let (file, file_len) = self.open(path)?;

        if offset >= file_len {
            return Ok(ReadOutcome::EndOfStream);
        }
        let remaining = file_len - offset;
        if remaining < FIXED_HEADER_LEN {
            return Ok(ReadOutcome::NotRecognized);
        }

        // Probe enough of the record to validate the header and find the
        // record length, then read the full record in one piece.
        let probe_len = remaining.min(PROBE_LEN) as usize;
        let mut probe = vec![0u8; probe_len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut probe)?;

        let header = match Header::parse(&probe) {
            Some(header) => header,
            None => return Ok(ReadOutcome::NotRecognized),
        };

        if u64::from(header.reclen) > remaining {
            return Ok(ReadOutcome::Corrupt {
                detail: format!(
                    "record length {} exceeds the {} bytes left in the file",
                    header.reclen, remaining
                ),
            });
        }

        let mut bytes = vec![0u8; header.reclen as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut bytes)?;

        trace!(
            stream = %header.stream_id,
            offset,
            reclen = header.reclen,
            "framed record"
        );

        Ok(ReadOutcome::Record(Record {
            bytes,
            stream_id: header.stream_id,
            start_time: header.start_time,
            end_time: header.end_time,
        }))
    }
}

struct Header {
    stream_id: String,
    start_time: HpTime,
    end_time: HpTime,
    reclen: u32,
}

impl Header {
    /// Validates the fixed header and extracts framing fields.
    ///
    /// Returns `None` whenever the bytes do not look like a miniSEED 2
    /// record; structural damage inside a recognized record is reported by
    /// the caller instead.
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIXED_HEADER_LEN as usize {
            return None;
        }

        // Sequence number: six ASCII digits or spaces.
        if !buf[0..6]
            .iter()
            .all(|&b| b.is_ascii_digit() || b == b' ')
        {
            return None;
        }
        // Data quality indicator.
        if !matches!(buf[6], b'D' | b'R' | b'Q' | b'M') {
            return None;
        }
        if !matches!(buf[7], b' ' | 0) {
            return None;
        }

        // Header byte order is unspecified; a plausible year decides.
        let big_endian = match (plausible_year(read_u16(buf, 20, true)),
            plausible_year(read_u16(buf, 20, false)))
        {
            (true, _) => true,
            (false, true) => false,
            (false, false) => return None,
        };

        let year = read_u16(buf, 20, big_endian);
        let doy = read_u16(buf, 22, big_endian);
        let hour = buf[24];
        let minute = buf[25];
        let second = buf[26];
        let fract = read_u16(buf, 28, big_endian);

        let samples = read_u16(buf, 30, big_endian);
        let factor = read_u16(buf, 32, big_endian) as i16;
        let multiplier = read_u16(buf, 34, big_endian) as i16;
        let activity = buf[36];
        let correction = read_u32(buf, 40, big_endian) as i32;

        let reclen = find_reclen(buf, big_endian)?;

        let mut start_time = btime_to_hptime(year, doy, hour, minute, second, fract)?;
        // Correction units are 0.0001 s; bit 1 of the activity flags marks
        // it as already applied to the header time.
        if activity & 0x02 == 0 {
            start_time += HpTime::from(correction) * 100;
        }

        let rate = sample_rate(factor, multiplier);
        let end_time = if rate > 0.0 && samples > 1 {
            let span = f64::from(samples - 1) / rate * 1_000_000.0;
            start_time + span as HpTime
        } else {
            start_time
        };

        let network = field(&buf[18..20]);
        let station = field(&buf[8..13]);
        let location = field(&buf[13..15]);
        let channel = field(&buf[15..18]);
        let stream_id = format!("{network}_{station}_{location}_{channel}/MSEED");

        Some(Self {
            stream_id,
            start_time,
            end_time,
            reclen,
        })
    }
}

fn field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}

fn plausible_year(year: u16) -> bool {
    (1900..=2100).contains(&year)
}

fn read_u16(buf: &[u8], at: usize, big_endian: bool) -> u16 {
    let pair = [buf[at], buf[at + 1]];
    if big_endian {
        u16::from_be_bytes(pair)
    } else {
        u16::from_le_bytes(pair)
    }
}

fn read_u32(buf: &[u8], at: usize, big_endian: bool) -> u32 {
    let quad = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
    if big_endian {
        u32::from_be_bytes(quad)
    } else {
        u32::from_le_bytes(quad)
    }
}

/// Walks the blockette chain looking for Blockette 1000's record length.
fn find_reclen(buf: &[u8], big_endian: bool) -> Option<u32> {
    let blockette_count = buf[39];
    let mut at = read_u16(buf, 46, big_endian) as usize;
    for _ in 0..blockette_count.max(1) {
        if at < FIXED_HEADER_LEN as usize || at + 8 > buf.len() {
            return None;
        }
        let btype = read_u16(buf, at, big_endian);
        let next = read_u16(buf, at + 2, big_endian) as usize;
        if btype == 1000 {
            let power = buf[at + 6];
            if !(MIN_RECLEN_POWER..=MAX_RECLEN_POWER).contains(&power) {
                return None;
            }
            return Some(1u32 << power);
        }
        if next <= at {
            return None;
        }
        at = next;
    }
    None
}

fn sample_rate(factor: i16, multiplier: i16) -> f64 {
    let base = match factor {
        0 => return 0.0,
        f if f > 0 => f64::from(f),
        f => -1.0 / f64::from(f),
    };
    match multiplier {
        0 => 0.0,
        m if m > 0 => base * f64::from(m),
        m => base / f64::from(-m),
    }
}

/// Converts a BTime (year, day-of-year, fraction in 0.0001 s) to
/// microseconds since the epoch.
fn btime_to_hptime(
    year: u16,
    doy: u16,
    hour: u8,
    minute: u8,
    second: u8,
    fract: u16,
) -> Option<HpTime> {
    let date = Date::from_ordinal_date(i32::from(year), doy).ok()?;
    // Leap seconds appear as 60 in the field; fold into the next second.
    let (second, carry) = if second == 60 { (59, 1) } else { (second, 0) };
    let time = Time::from_hms_micro(
        hour,
        minute,
        second,
        u32::from(fract) * 100,
    )
    .ok()?;
    let stamp = PrimitiveDateTime::new(date, time).assume_utc();
    let micros = stamp.unix_timestamp_nanos() / 1_000;
    let micros = i64::try_from(micros).ok()?;
    Some(micros + carry * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Builds one synthetic 512-byte record with a Blockette 1000.
    pub(crate) fn test_record(seq: u32, station: &str, year: u16, doy: u16, hour: u8) -> Vec<u8> {
        let mut rec = vec![0u8; 512];
        rec[0..6].copy_from_slice(format!("{seq:06}").as_bytes());
        rec[6] = b'D';
        rec[7] = b' ';
        rec[8..13].copy_from_slice(format!("{station:<5}").as_bytes());
        rec[13..15].copy_from_slice(b"  ");
        rec[15..18].copy_from_slice(b"BHZ");
        rec[18..20].copy_from_slice(b"XX");
        rec[20..22].copy_from_slice(&year.to_be_bytes());
        rec[22..24].copy_from_slice(&doy.to_be_bytes());
        rec[24] = hour;
        rec[30..32].copy_from_slice(&100u16.to_be_bytes()); // samples
        rec[32..34].copy_from_slice(&20u16.to_be_bytes()); // 20 Hz
        rec[34..36].copy_from_slice(&1u16.to_be_bytes());
        rec[39] = 1; // one blockette
        rec[46..48].copy_from_slice(&48u16.to_be_bytes());
        // Blockette 1000 at offset 48: type, next, encoding, word order,
        // record length power, reserved.
        rec[48..50].copy_from_slice(&1000u16.to_be_bytes());
        rec[54] = 9; // 2^9 = 512
        rec
    }

    fn read_all(path: &Path) -> Vec<Record> {
        let mut reader = MseedReader::new();
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            match reader.read_at(path, offset).expect("read") {
                ReadOutcome::Record(record) => {
                    offset += record.len();
                    records.push(record);
                }
                ReadOutcome::EndOfStream => return records,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn frames_sequential_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("two.mseed");
        let mut data = test_record(1, "FOO", 2024, 32, 6);
        data.extend(test_record(2, "FOO", 2024, 32, 7));
        fs::write(&path, &data).expect("write");

        let records = read_all(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stream_id, "XX_FOO__BHZ/MSEED");
        assert_eq!(records[0].len(), 512);
        assert!(records[1].start_time > records[0].start_time);
    }

    #[test]
    fn resumes_exactly_at_an_offset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("two.mseed");
        let mut data = test_record(1, "FOO", 2024, 32, 6);
        data.extend(test_record(2, "BAR", 2024, 32, 7));
        fs::write(&path, &data).expect("write");

        let mut reader = MseedReader::new();
        let outcome = reader.read_at(&path, 512).expect("read");
        match outcome {
            ReadOutcome::Record(record) => {
                assert_eq!(record.stream_id, "XX_BAR__BHZ/MSEED");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn start_time_matches_btime() {
        // 2024-02-01 (doy 32) 06:00:00 UTC = 1706767200.
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("one.mseed");
        fs::write(&path, test_record(1, "FOO", 2024, 32, 6)).expect("write");

        let records = read_all(&path);
        assert_eq!(records[0].start_time, 1_706_767_200_000_000);
        // 100 samples at 20 Hz span 4.95 s.
        assert_eq!(
            records[0].end_time - records[0].start_time,
            4_950_000
        );
    }

    #[test]
    fn non_record_data_is_not_recognized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("junk.bin");
        fs::write(&path, vec![0xAAu8; 4096]).expect("write");

        let mut reader = MseedReader::new();
        assert!(matches!(
            reader.read_at(&path, 0).expect("read"),
            ReadOutcome::NotRecognized
        ));
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("short.mseed");
        let mut data = test_record(1, "FOO", 2024, 32, 6);
        data.truncate(300);
        fs::write(&path, &data).expect("write");

        let mut reader = MseedReader::new();
        assert!(matches!(
            reader.read_at(&path, 0).expect("read"),
            ReadOutcome::Corrupt { .. }
        ));
    }

    #[test]
    fn empty_file_is_end_of_stream() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("empty.mseed");
        fs::write(&path, b"").expect("write");

        let mut reader = MseedReader::new();
        assert!(matches!(
            reader.read_at(&path, 0).expect("read"),
            ReadOutcome::EndOfStream
        ));
    }

    #[test]
    fn little_endian_headers_are_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("le.mseed");
        let mut rec = test_record(1, "FOO", 2024, 32, 6);
        // Rewrite the multi-byte fields little-endian.
        rec[20..22].copy_from_slice(&2024u16.to_le_bytes());
        rec[22..24].copy_from_slice(&32u16.to_le_bytes());
        rec[30..32].copy_from_slice(&100u16.to_le_bytes());
        rec[32..34].copy_from_slice(&20u16.to_le_bytes());
        rec[34..36].copy_from_slice(&1u16.to_le_bytes());
        rec[46..48].copy_from_slice(&48u16.to_le_bytes());
        rec[48..50].copy_from_slice(&1000u16.to_le_bytes());
        fs::write(&path, &rec).expect("write");

        let records = read_all(&path);
        assert_eq!(records[0].start_time, 1_706_767_200_000_000);
    }
}
