//! Append-only cycle log with a one-time header and a period-index column
//! that keeps counting across power cycles.
//!
//! File layout:
//!
//! ```text
//! Time [minutes],Moisture [%],Pump Run [seconds],...
//! 0,20,6,...
//! 20,40,0,...
//! ```
//!
//! The log file is the node's only durable state. Every boot reopens it and
//! recovers the last period index from the final line.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::record::{CycleRecord, Schema};

/// Heading of the leading period-index column.
pub const TIME_HEADING: &str = "Time [minutes]";

const SEP: &str = ",";

/// Bytes read from the end of the file when recovering the last line.
const TAIL_BYTES: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("record does not match log schema (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("log header {found:?} does not match the configured schema")]
    HeaderMismatch { found: String },
    #[error("unreadable period index in log line {line:?}")]
    Corrupt { line: String },
    #[error("log i/o: {0}")]
    Io(#[from] io::Error),
}

pub struct CycleLog {
    path: PathBuf,
    file: File,
    schema: Schema,
    period_min: i64,
    last_period_index: i64,
}

impl CycleLog {
    /// Open or create the log at `path`.
    ///
    /// A new (or empty) file gets the header. An existing file has its header
    /// checked against `schema`; a torn final line left by power loss
    /// mid-write is cut off before the last period index is recovered.
    pub fn open(path: &Path, schema: &Schema, period_min: u32) -> Result<Self, LogError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let period_min = i64::from(period_min);
        let header = header_line(schema);

        let mut len = file.metadata()?.len();
        let mut tail = Vec::new();
        if len > 0 {
            let (start, bytes) = read_tail(&mut file, len)?;
            if bytes.last() != Some(&b'\n') {
                len = repair_torn_line(&file, len, start, &bytes)?;
                if len > 0 {
                    tail = read_tail(&mut file, len)?.1;
                }
            } else {
                tail = bytes;
            }
        }

        let last_period_index = if len == 0 {
            file.write_all(header.as_bytes())?;
            file.sync_data()?;
            info!(path = %path.display(), "created cycle log");
            -period_min
        } else {
            let mut first = Vec::new();
            file.seek(SeekFrom::Start(0))?;
            BufReader::new(&file).read_until(b'\n', &mut first)?;
            if first != header.as_bytes() {
                return Err(LogError::HeaderMismatch {
                    found: String::from_utf8_lossy(&first).trim_end().to_string(),
                });
            }
            recover_last_index(&tail_text(&tail, len), &header)?.unwrap_or(-period_min)
        };

        debug!(path = %path.display(), last_period_index, "cycle log open");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            schema: schema.clone(),
            period_min,
            last_period_index,
        })
    }

    /// Append `record` as the next period. The line is written in one call
    /// and synced to disk before this returns. Nothing is written when the
    /// record does not match the schema.
    pub fn append(&mut self, record: &CycleRecord) -> Result<i64, LogError> {
        self.check_schema(record)?;

        let index = self.last_period_index + self.period_min;
        let mut line = index.to_string();
        for field in self.schema.fields() {
            // Presence checked above.
            let value = record.get(&field.heading).unwrap_or(0.0);
            line.push_str(SEP);
            line.push_str(&value.to_string());
        }
        line.push('\n');

        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.last_period_index = index;

        debug!(path = %self.path.display(), period_index = index, "log line appended");
        Ok(index)
    }

    #[cfg(test)]
    pub fn last_period_index(&self) -> i64 {
        self.last_period_index
    }

    fn check_schema(&self, record: &CycleRecord) -> Result<(), LogError> {
        let missing: Vec<String> = self
            .schema
            .fields()
            .iter()
            .filter(|f| record.get(&f.heading).is_none())
            .map(|f| f.heading.clone())
            .collect();
        let unexpected: Vec<String> = record
            .headings()
            .filter(|h| !self.schema.contains(h))
            .map(str::to_string)
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(LogError::SchemaMismatch {
                missing,
                unexpected,
            })
        }
    }
}

fn header_line(schema: &Schema) -> String {
    let mut line = TIME_HEADING.to_string();
    for field in schema.fields() {
        line.push_str(SEP);
        line.push_str(&field.heading);
    }
    line.push('\n');
    line
}

/// Up to the last `TAIL_BYTES` of the file, with the offset they start at.
fn read_tail(file: &mut File, len: u64) -> io::Result<(u64, Vec<u8>)> {
    let start = len.saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    Ok((start, buf))
}

/// Decode a newline-terminated tail for index parsing, dropping the partial
/// line at the front of a window that starts mid-file.
fn tail_text(tail: &[u8], len: u64) -> String {
    let window_is_whole_file = tail.len() as u64 == len;
    let from = if window_is_whole_file {
        0
    } else {
        tail.iter().position(|&b| b == b'\n').map_or(tail.len(), |p| p + 1)
    };
    String::from_utf8_lossy(&tail[from..]).into_owned()
}

/// Truncate the file back to the end of its last complete line. `tail` is
/// the window read from offset `start`. Returns the new length.
fn repair_torn_line(file: &File, len: u64, start: u64, tail: &[u8]) -> Result<u64, LogError> {
    let new_len = match tail.iter().rposition(|&b| b == b'\n') {
        Some(pos) => start + pos as u64 + 1,
        None if start == 0 => 0,
        None => {
            return Err(LogError::Corrupt {
                line: String::from_utf8_lossy(&tail[..tail.len().min(64)]).into_owned(),
            })
        }
    };
    warn!(
        dropped_bytes = len - new_len,
        new_len, "cycle log ends in a partial line, truncating"
    );
    file.set_len(new_len)?;
    file.sync_data()?;
    Ok(new_len)
}

/// Period index of the last data line in `tail`, or `None` when the log
/// holds only its header.
fn recover_last_index(tail: &str, header: &str) -> Result<Option<i64>, LogError> {
    let header = header.trim_end();
    let Some(last) = tail
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
    else {
        return Ok(None);
    };
    if last == header {
        return Ok(None);
    }

    let first = last.split(SEP).next().unwrap_or_default().trim();
    first
        .parse::<i64>()
        .ok()
        .or_else(|| first.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
        .map(Some)
        .ok_or_else(|| LogError::Corrupt {
            line: last.to_string(),
        })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::{Field, DISTANCE, MOISTURE, PUMP};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    /// Fresh path under the system temp dir; removed if it already exists.
    pub(crate) fn temp_log_path(tag: &str) -> PathBuf {
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "cycle-log-{tag}-{}-{n}.txt",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn small_schema() -> Schema {
        Schema::new(vec![Field::new(MOISTURE, "moisture"), Field::new(PUMP, "pump")]).unwrap()
    }

    fn record(moisture: f64, pump: f64) -> CycleRecord {
        let mut rec = CycleRecord::new();
        rec.insert(MOISTURE, moisture);
        rec.insert(PUMP, pump);
        rec
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn fresh_log_writes_header_and_first_index_zero() {
        let path = temp_log_path("fresh");
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), -20);

        let idx = log.append(&record(20.0, 6.0)).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(
            lines(&path),
            vec![
                "Time [minutes],Moisture [%],Pump Run [seconds]".to_string(),
                "0,20,6".to_string(),
            ]
        );
    }

    #[test]
    fn reopen_continues_from_last_index() {
        let path = temp_log_path("reopen");
        {
            let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
            log.append(&record(20.0, 6.0)).unwrap();
            log.append(&record(25.0, 3.5)).unwrap();
        }
        // Simulated power loss: handle dropped, process restarts.
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), 20);
        assert_eq!(log.append(&record(40.0, 0.0)).unwrap(), 40);

        let content = lines(&path);
        assert_eq!(content.len(), 4);
        assert_eq!(content[0].matches(TIME_HEADING).count(), 1);
        assert_eq!(content[3], "40,40,0");
    }

    #[test]
    fn recovers_index_written_with_another_period() {
        let path = temp_log_path("k");
        std::fs::write(
            &path,
            "Time [minutes],Moisture [%],Pump Run [seconds]\n0,1,0\n137,2,0\n",
        )
        .unwrap();
        let mut log = CycleLog::open(&path, &small_schema(), 30).unwrap();
        assert_eq!(log.append(&record(3.0, 0.0)).unwrap(), 167);
    }

    #[test]
    fn header_only_log_starts_at_zero() {
        let path = temp_log_path("header-only");
        drop(CycleLog::open(&path, &small_schema(), 20).unwrap());
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.append(&record(1.0, 0.0)).unwrap(), 0);
        assert_eq!(lines(&path).len(), 2);
    }

    #[test]
    fn missing_field_rejected_and_nothing_written() {
        let path = temp_log_path("missing");
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut rec = CycleRecord::new();
        rec.insert(MOISTURE, 10.0);
        match log.append(&rec) {
            Err(LogError::SchemaMismatch { missing, unexpected }) => {
                assert_eq!(missing, vec![PUMP.to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(log.last_period_index(), -20);
    }

    #[test]
    fn extra_field_rejected_and_nothing_written() {
        let path = temp_log_path("extra");
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut rec = record(10.0, 0.0);
        rec.insert(DISTANCE, 5.0);
        match log.append(&rec) {
            Err(LogError::SchemaMismatch { missing, unexpected }) => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec![DISTANCE.to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn values_written_in_schema_order() {
        let path = temp_log_path("order");
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        let mut rec = CycleRecord::new();
        rec.insert(PUMP, 2.5);
        rec.insert(MOISTURE, 31.25);
        log.append(&rec).unwrap();
        assert_eq!(lines(&path)[1], "0,31.25,2.5");
    }

    #[test]
    fn torn_final_line_is_dropped_on_open() {
        let path = temp_log_path("torn");
        std::fs::write(
            &path,
            "Time [minutes],Moisture [%],Pump Run [seconds]\n0,20,6\n20,3",
        )
        .unwrap();
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), 0);
        log.append(&record(30.0, 1.0)).unwrap();
        assert_eq!(lines(&path)[1..], ["0,20,6".to_string(), "20,30,1".to_string()]);
    }

    #[test]
    fn torn_header_is_rewritten() {
        let path = temp_log_path("torn-header");
        std::fs::write(&path, "Time [min").unwrap();
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.append(&record(5.0, 0.0)).unwrap(), 0);
        assert_eq!(lines(&path)[0], "Time [minutes],Moisture [%],Pump Run [seconds]");
    }

    #[test]
    fn binary_garbage_after_last_line_is_dropped() {
        let path = temp_log_path("torn-binary");
        let mut bytes = b"Time [minutes],Moisture [%],Pump Run [seconds]\n0,20,6\n20,30,1\n".to_vec();
        let good_len = bytes.len() as u64;
        bytes.extend_from_slice(&[0xFF; 4]);
        std::fs::write(&path, &bytes).unwrap();

        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), 20);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        assert_eq!(log.append(&record(31.0, 0.0)).unwrap(), 40);
        assert_eq!(
            lines(&path)[1..],
            ["0,20,6".to_string(), "20,30,1".to_string(), "40,31,0".to_string()]
        );
    }

    #[test]
    fn split_multibyte_tail_is_dropped() {
        let path = temp_log_path("torn-utf8");
        let mut bytes = b"Time [minutes],Moisture [%],Pump Run [seconds]\n0,20,6\n".to_vec();
        // First two bytes of a three-byte character, then power loss.
        bytes.extend_from_slice(&[b'2', b'0', b',', 0xE2, 0x82]);
        std::fs::write(&path, &bytes).unwrap();

        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.append(&record(25.0, 1.0)).unwrap(), 20);
        assert_eq!(lines(&path)[1..], ["0,20,6".to_string(), "20,25,1".to_string()]);
    }

    #[test]
    fn garbage_only_file_is_reset() {
        let path = temp_log_path("garbage-only");
        std::fs::write(&path, [0xFF]).unwrap();

        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), -20);
        assert_eq!(log.append(&record(5.0, 0.0)).unwrap(), 0);
        assert_eq!(lines(&path)[0], "Time [minutes],Moisture [%],Pump Run [seconds]");
    }

    #[test]
    fn long_log_with_binary_tail_keeps_every_line() {
        let path = temp_log_path("long-binary");
        {
            let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
            for i in 0..400 {
                log.append(&record(f64::from(i), 0.5)).unwrap();
            }
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xC3; 300]).unwrap();
        drop(file);

        let log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), 399 * 20);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn empty_existing_file_gets_header() {
        let path = temp_log_path("empty");
        std::fs::write(&path, "").unwrap();
        let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        log.append(&record(5.0, 0.0)).unwrap();
        assert_eq!(lines(&path).len(), 2);
    }

    #[test]
    fn foreign_header_rejected() {
        let path = temp_log_path("foreign");
        std::fs::write(&path, "a,b,c\n1,2,3\n").unwrap();
        assert!(matches!(
            CycleLog::open(&path, &small_schema(), 20),
            Err(LogError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn garbage_index_reported_corrupt() {
        let path = temp_log_path("garbage");
        std::fs::write(
            &path,
            "Time [minutes],Moisture [%],Pump Run [seconds]\nxx,1,2\n",
        )
        .unwrap();
        assert!(matches!(
            CycleLog::open(&path, &small_schema(), 20),
            Err(LogError::Corrupt { .. })
        ));
    }

    #[test]
    fn long_log_recovers_from_tail() {
        let path = temp_log_path("long");
        {
            let mut log = CycleLog::open(&path, &small_schema(), 20).unwrap();
            for i in 0..500 {
                log.append(&record(f64::from(i) + 0.125, 1.5)).unwrap();
            }
        }
        assert!(std::fs::metadata(&path).unwrap().len() > TAIL_BYTES);
        let log = CycleLog::open(&path, &small_schema(), 20).unwrap();
        assert_eq!(log.last_period_index(), 499 * 20);
    }
}
