//! Append-only attendance log.
//!
//! The durable log is a CSV file with header `Name,Date,Time` and one row
//! per attendance event. This module never rewrites or deletes rows; the
//! one-row-per-person-per-day policy is enforced by the ledger, not here.

use crate::types::AttendanceRecord;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: [&str; 3] = ["Name", "Date", "Time"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot initialize attendance log {}: {source}", .path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot append to attendance log {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot read attendance log {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Durable destination for attendance records.
pub trait AttendanceLog {
    /// Create the log with its header if it does not exist yet. Idempotent.
    fn ensure_initialized(&mut self) -> Result<(), StoreError>;

    /// Append one record.
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// All records logged for `date`, in file order.
    fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// CSV-file attendance log.
#[derive(Debug, Clone)]
pub struct CsvAttendanceStore {
    path: PathBuf,
}

impl CsvAttendanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the log. A missing log reads as empty.
    pub fn read_all(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let read_err = |source: csv::Error| StoreError::Read {
            path: self.path.clone(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(read_err)?;

        reader
            .deserialize::<AttendanceRecord>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)
    }

    fn write_header(&self) -> Result<(), csv::Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        sync(writer)
    }
}

impl AttendanceLog for CsvAttendanceStore {
    fn ensure_initialized(&mut self) -> Result<(), StoreError> {
        let init_err = |source: csv::Error| StoreError::Init {
            path: self.path.clone(),
            source,
        };

        let meta = match fs::metadata(&self.path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(init_err(e.into())),
        };

        match meta {
            Some(meta) if !meta.is_file() => Err(init_err(
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file").into(),
            )),
            Some(meta) if meta.len() > 0 => {
                // Existing log: it must accept appends now, not on the first sighting.
                OpenOptions::new()
                    .append(true)
                    .open(&self.path)
                    .map_err(|e| init_err(e.into()))?;
                tracing::debug!(path = %self.path.display(), "attendance log present");
                Ok(())
            }
            _ => {
                self.write_header().map_err(init_err)?;
                tracing::info!(path = %self.path.display(), "created attendance log");
                Ok(())
            }
        }
    }

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let write = || -> Result<(), csv::Error> {
            let file = OpenOptions::new().append(true).open(&self.path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            writer.serialize(record)?;
            sync(writer)
        };

        write().map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut records = self.read_all()?;
        records.retain(|r| r.date == date);
        Ok(records)
    }
}

fn sync(writer: csv::Writer<File>) -> Result<(), csv::Error> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use chrono::NaiveTime;
    use tempfile::TempDir;

    fn record(name: &str, d: u32, h: u32) -> AttendanceRecord {
        AttendanceRecord::new(
            Identity::new(name).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
            NaiveTime::from_hms_opt(h, 5, 9).unwrap(),
        )
    }

    #[test]
    fn test_initialize_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/attendance.csv");
        let mut store = CsvAttendanceStore::new(&path);

        store.ensure_initialized().unwrap();
        store.ensure_initialized().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Date,Time\n");

        store.append(&record("alice", 1, 8)).unwrap();
        store.ensure_initialized().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name,Date,Time\nalice,2024-03-01,08:05:09\n"
        );
    }

    #[test]
    fn test_initialize_fails_on_unwritable_path() {
        let dir = TempDir::new().unwrap();
        // A regular file where a parent directory is expected.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let mut store = CsvAttendanceStore::new(blocker.join("attendance.csv"));
        let err = store.ensure_initialized().unwrap_err();
        assert!(matches!(err, StoreError::Init { .. }), "got {err:?}");
    }

    #[test]
    fn test_initialize_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvAttendanceStore::new(dir.path());
        let err = store.ensure_initialized().unwrap_err();
        assert!(matches!(err, StoreError::Init { .. }), "got {err:?}");
    }

    #[test]
    fn test_initialize_rejects_read_only_log() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Name,Date,Time\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        // Privileged users bypass file modes; nothing to check there.
        if OpenOptions::new().append(true).open(&path).is_ok() {
            return;
        }
        let mut store = CsvAttendanceStore::new(&path);
        let err = store.ensure_initialized().unwrap_err();
        assert!(matches!(err, StoreError::Init { .. }), "got {err:?}");
    }

    #[test]
    fn test_padded_name_reads_back_with_same_key() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvAttendanceStore::new(dir.path().join("attendance.csv"));
        store.ensure_initialized().unwrap();

        let written = record(" alice ", 1, 8);
        store.append(&written).unwrap();
        let read = store.read_all().unwrap();
        assert_eq!(read[0].key(), written.key());
    }

    #[test]
    fn test_append_without_log_is_write_error() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvAttendanceStore::new(dir.path().join("missing.csv"));
        let err = store.append(&record("alice", 1, 8)).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "got {err:?}");
    }

    #[test]
    fn test_records_round_trip_and_filter_by_date() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvAttendanceStore::new(dir.path().join("attendance.csv"));
        store.ensure_initialized().unwrap();

        store.append(&record("alice", 1, 8)).unwrap();
        store.append(&record("bob", 1, 9)).unwrap();
        store.append(&record("alice", 2, 8)).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1], record("bob", 1, 9));

        let day_one = store
            .records_on(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .unwrap();
        let names: Vec<_> = day_one.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = CsvAttendanceStore::new(dir.path().join("nope.csv"));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_blank_name_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Name,Date,Time\n,2024-03-01,08:00:00\n").unwrap();
        let store = CsvAttendanceStore::new(&path);
        assert!(matches!(store.read_all(), Err(StoreError::Read { .. })));
    }
}
