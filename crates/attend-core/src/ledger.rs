//! Append-only attendance ledger stored as CSV.
//!
//! At most one row per identity per calendar day. The check is a read of the
//! existing rows before each append; the file is opened and closed per call
//! so it can be inspected or edited between writes.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_HEADER: [&str; 4] = ["ID", "Name", "Date", "Time"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result of a [`AttendanceLedger::mark`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Written,
    AlreadyMarked,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceEvent {
    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() != LEDGER_HEADER.len() {
            return None;
        }
        Some(Self {
            identity_id: record[0].to_string(),
            name: record[1].to_string(),
            date: NaiveDate::parse_from_str(&record[2], DATE_FORMAT).ok()?,
            time: NaiveTime::parse_from_str(&record[3], TIME_FORMAT).ok()?,
        })
    }
}

/// CSV-backed attendance ledger.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record attendance for `identity_id` on the date of `now`, unless a
    /// row for that identity and date already exists.
    pub fn mark(&self, identity_id: &str, name: &str, now: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let date = now.date();
        if self.is_marked(identity_id, date)? {
            tracing::debug!(id = identity_id, %date, "attendance already marked today");
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        let needs_header = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;
        if !needs_header && !ends_with_newline(&mut file).map_err(|e| self.io_err(e))? {
            file.write_all(b"\n").map_err(|e| self.io_err(e))?;
        }

        let time = now.format(TIME_FORMAT).to_string();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut file);
            if needs_header {
                writer.write_record(LEDGER_HEADER).map_err(|e| self.csv_err(e))?;
            }
            writer
                .write_record([identity_id, name, date.format(DATE_FORMAT).to_string().as_str(), time.as_str()])
                .map_err(|e| self.csv_err(e))?;
            writer.flush().map_err(|e| self.io_err(e))?;
        }

        tracing::info!(id = identity_id, name, %date, time = %time, "attendance marked");
        Ok(MarkOutcome::Written)
    }

    /// True when a row exists for `identity_id` on `date`.
    pub fn is_marked(&self, identity_id: &str, date: NaiveDate) -> Result<bool, LedgerError> {
        Ok(self
            .entries()?
            .iter()
            .any(|e| e.identity_id == identity_id && e.date == date))
    }

    /// All well-formed rows. A missing ledger file reads as empty; the header
    /// and malformed rows are skipped.
    pub fn entries(&self) -> Result<Vec<AttendanceEvent>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut events = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(|e| self.csv_err(e))?;
            let line = record.position().map(|p| p.line());
            // Rows saved in a legacy encoding are skipped like any other malformed row.
            let record = match csv::StringRecord::from_byte_record(record) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(?line, error = %e, "skipping non-UTF-8 ledger row");
                    continue;
                }
            };
            match AttendanceEvent::from_record(&record) {
                Some(event) => events.push(event),
                None if is_header(&record) => {}
                None => tracing::debug!(row = ?record, "skipping malformed ledger row"),
            }
        }
        Ok(events)
    }

    /// Rows recorded on `date`, in file order.
    pub fn entries_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>, LedgerError> {
        Ok(self.entries()?.into_iter().filter(|e| e.date == date).collect())
    }

    fn io_err(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_header(record: &csv::StringRecord) -> bool {
    record.iter().eq(LEDGER_HEADER.iter().copied())
}

/// Whether a non-empty file ends in `\n`.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::new(
            NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            NaiveTime::parse_from_str(time, TIME_FORMAT).unwrap(),
        )
    }

    fn ledger() -> (TempDir, AttendanceLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance_log.csv"));
        (dir, ledger)
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, ledger) = ledger();
        assert!(ledger.entries().unwrap().is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_first_write_adds_header() {
        let (_dir, ledger) = ledger();
        let outcome = ledger.mark("S1", "Jane Doe", at("2024-03-01", "09:15:02")).unwrap();
        assert_eq!(outcome, MarkOutcome::Written);

        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents, "ID,Name,Date,Time\nS1,Jane Doe,2024-03-01,09:15:02\n");
    }

    #[test]
    fn test_same_day_is_idempotent() {
        let (_dir, ledger) = ledger();
        assert_eq!(
            ledger.mark("S1", "Jane", at("2024-03-01", "09:00:00")).unwrap(),
            MarkOutcome::Written
        );
        assert_eq!(
            ledger.mark("S1", "Jane", at("2024-03-01", "17:30:00")).unwrap(),
            MarkOutcome::AlreadyMarked
        );

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_next_day_writes_again() {
        let (_dir, ledger) = ledger();
        ledger.mark("S1", "Jane", at("2024-03-01", "23:59:59")).unwrap();
        let outcome = ledger.mark("S1", "Jane", at("2024-03-02", "00:00:01")).unwrap();
        assert_eq!(outcome, MarkOutcome::Written);
        assert_eq!(ledger.entries().unwrap().len(), 2);

        let header_rows = fs::read_to_string(ledger.path())
            .unwrap()
            .lines()
            .filter(|l| *l == "ID,Name,Date,Time")
            .count();
        assert_eq!(header_rows, 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let (_dir, ledger) = ledger();
        ledger.mark("S1", "Jane", at("2024-03-01", "09:00:00")).unwrap();
        let outcome = ledger.mark("S2", "John", at("2024-03-01", "09:00:05")).unwrap();
        assert_eq!(outcome, MarkOutcome::Written);
        assert_eq!(ledger.entries_on(at("2024-03-01", "00:00:00").date()).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_existing_file_gets_header() {
        let (_dir, ledger) = ledger();
        fs::write(ledger.path(), "").unwrap();
        ledger.mark("S1", "Jane", at("2024-03-01", "09:00:00")).unwrap();
        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert!(contents.starts_with("ID,Name,Date,Time\n"));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let (_dir, ledger) = ledger();
        fs::write(
            ledger.path(),
            "ID,Name,Date,Time\nS1,Jane,2024-03-01\ngarbage\nS2,John,2024-03-01,08:00:00\n",
        )
        .unwrap();
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity_id, "S2");
        // The truncated S1 row does not count as attendance.
        assert_eq!(
            ledger.mark("S1", "Jane", at("2024-03-01", "10:00:00")).unwrap(),
            MarkOutcome::Written
        );
    }

    #[test]
    fn test_append_repairs_missing_trailing_newline() {
        let (_dir, ledger) = ledger();
        fs::write(ledger.path(), "ID,Name,Date,Time\nS1,Jane,2024-03-01,08:00:00").unwrap();
        ledger.mark("S2", "John", at("2024-03-01", "08:05:00")).unwrap();
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].identity_id, "S2");
    }

    #[test]
    fn test_non_utf8_row_is_skipped_and_ledger_stays_writable() {
        let (_dir, ledger) = ledger();
        fs::write(
            ledger.path(),
            b"ID,Name,Date,Time\nS7,Jos\xE9,2024-03-01,08:00:00\nS2,John,2024-03-01,08:05:00\n",
        )
        .unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity_id, "S2");

        let outcome = ledger.mark("S1", "Jane", at("2024-03-02", "09:00:00")).unwrap();
        assert_eq!(outcome, MarkOutcome::Written);
        let ids: Vec<String> = ledger.entries().unwrap().into_iter().map(|e| e.identity_id).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        // The foreign row is left in place untouched.
        assert!(fs::read(ledger.path()).unwrap().windows(4).any(|w| w == b"Jos\xE9"));
    }

    #[test]
    fn test_names_with_commas_are_quoted() {
        let (_dir, ledger) = ledger();
        ledger.mark("S1", "Doe, Jane", at("2024-03-01", "09:00:00")).unwrap();
        let entries = ledger.entries().unwrap();
        assert_eq!(entries[0].name, "Doe, Jane");
    }
}
