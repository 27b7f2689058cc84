// Local CSV mirror of the ledger, plus dated backup snapshots

use chrono::{DateTime, FixedOffset};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::transaction::{is_header_row, Transaction, LEDGER_HEADER};

const SNAPSHOT_PREFIX: &str = "weekly_backup_";

pub struct CsvMirror {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvMirror {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first when the file is new.
    pub fn append(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(LEDGER_HEADER)?;
        }
        writer.write_record(tx.to_row())?;
        writer.flush()?;

        Ok(())
    }

    /// Every mirrored transaction in file order. A missing file is empty;
    /// rows that do not decode are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<Transaction>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut transactions = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let row: Vec<&str> = record.iter().collect();
            if is_header_row(row.as_slice()) || row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            match Transaction::from_row(row.as_slice()) {
                Ok(tx) => transactions.push(tx),
                Err(reason) => {
                    tracing::warn!(row = index + 1, %reason, path = %self.path.display(), "Skipping invalid mirror row");
                }
            }
        }

        Ok(transactions)
    }
}

/// Write `rows` (header prepended when missing) to a dated snapshot in `dir`
/// and keep only the newest `keep` snapshots.
pub fn write_snapshot(
    dir: &Path,
    rows: &[Vec<String>],
    now: DateTime<FixedOffset>,
    keep: usize,
) -> Result<PathBuf, LedgerError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{SNAPSHOT_PREFIX}{}.csv", now.format("%Y%m%d")));

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(&path)?;
    if !rows.first().is_some_and(|r| is_header_row(r.as_slice())) {
        writer.write_record(LEDGER_HEADER)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    prune_snapshots(dir, keep)?;
    Ok(path)
}

/// Delete the oldest snapshots beyond `keep`. Returns how many were removed.
pub fn prune_snapshots(dir: &Path, keep: usize) -> Result<usize, LedgerError> {
    let mut snapshots: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".csv"))
        })
        .collect();

    if snapshots.len() <= keep {
        return Ok(0);
    }

    // Names embed YYYYMMDD, so lexical order is chronological
    snapshots.sort();
    let excess = snapshots.len() - keep;
    for path in &snapshots[..excess] {
        fs::remove_file(path)?;
        tracing::info!(path = %path.display(), "Removed old backup snapshot");
    }

    Ok(excess)
}
