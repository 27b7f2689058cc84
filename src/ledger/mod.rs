// Ledger Store - append-only transaction log
// The spreadsheet is the record of truth; the CSV mirror is a local copy
// written after every remote append and read when the remote is unreachable.

pub mod mirror;
pub mod sheets;

pub use mirror::CsvMirror;
pub use sheets::{GoogleSheet, RemoteSheet};

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{LedgerError, Sink};
use crate::transaction::{is_header_row, signed_sum, Period, Transaction, LEDGER_HEADER};

/// Weekly snapshots kept in the backup directory
pub const SNAPSHOT_RETENTION: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// False when the spreadsheet row landed but the CSV mirror did not
    pub mirrored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub rows: usize,
}

pub struct LedgerStore {
    remote: Arc<dyn RemoteSheet>,
    mirror: CsvMirror,
}

impl LedgerStore {
    pub fn new(remote: Arc<dyn RemoteSheet>, mirror: CsvMirror) -> Self {
        LedgerStore { remote, mirror }
    }

    pub fn mirror(&self) -> &CsvMirror {
        &self.mirror
    }

    // ========================================================================
    // WRITE
    // ========================================================================

    /// Append one transaction to the spreadsheet, then to the CSV mirror.
    pub async fn append(&self, tx: &Transaction) -> Result<AppendReceipt, LedgerError> {
        let remote = self.remote.append_row(tx.to_row()).await;
        let mirror = self.mirror.append(tx);

        match (remote, mirror) {
            (Ok(()), Ok(())) => Ok(AppendReceipt { mirrored: true }),
            (Ok(()), Err(e)) => {
                let err = LedgerError::PartialWrite {
                    failed: Sink::CsvMirror,
                    reason: e.to_string(),
                };
                tracing::warn!(
                    sender = %tx.sender,
                    message_id = ?tx.message_id,
                    error = %err,
                    "Row stored in spreadsheet but CSV mirror append failed"
                );
                Ok(AppendReceipt { mirrored: false })
            }
            (Err(e), Ok(())) => {
                tracing::error!(
                    sender = %tx.sender,
                    message_id = ?tx.message_id,
                    error = %e,
                    "Spreadsheet append failed; row kept in CSV mirror only"
                );
                Err(LedgerError::PartialWrite {
                    failed: Sink::Spreadsheet,
                    reason: e.to_string(),
                })
            }
            (Err(remote), Err(mirror)) => Err(LedgerError::WriteFailed {
                remote: remote.to_string(),
                mirror: mirror.to_string(),
            }),
        }
    }

    /// Write the header row into an empty sheet. Returns true if written.
    pub async fn ensure_header(&self) -> Result<bool, LedgerError> {
        let rows = self.remote.read_rows().await?;
        if !rows.is_empty() {
            if !is_header_row(rows[0].as_slice()) {
                tracing::warn!("Spreadsheet has rows but no header; leaving it untouched");
            }
            return Ok(false);
        }

        let header = LEDGER_HEADER.iter().map(|s| s.to_string()).collect();
        self.remote.append_row(header).await?;
        tracing::info!("Wrote header row to empty spreadsheet");
        Ok(true)
    }

    // ========================================================================
    // READ
    // ========================================================================

    /// Transactions in insertion order within `period` relative to `now`.
    pub async fn read_all(
        &self,
        period: Period,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let all = match self.remote.read_rows().await {
            Ok(rows) => parse_rows(&rows),
            Err(e) => {
                tracing::warn!(error = %e, "Spreadsheet read failed; reading CSV mirror");
                self.mirror.read_all()?
            }
        };

        Ok(all
            .into_iter()
            .filter(|tx| period.contains(tx.timestamp, now))
            .collect())
    }

    /// Whether the spreadsheet answers a read right now.
    pub async fn remote_reachable(&self) -> bool {
        match self.remote.read_rows().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Spreadsheet unreachable");
                false
            }
        }
    }

    /// Signed sum over every transaction, recomputed on each call.
    pub async fn current_balance(&self, now: DateTime<FixedOffset>) -> Result<Decimal, LedgerError> {
        let all = self.read_all(Period::All, now).await?;
        signed_sum(&all)
    }

    // ========================================================================
    // BACKUP
    // ========================================================================

    /// Write a dated full copy of the ledger into `dir` and prune old copies.
    pub async fn backup_snapshot(
        &self,
        dir: &Path,
        now: DateTime<FixedOffset>,
    ) -> Result<Snapshot, LedgerError> {
        let rows = match self.remote.read_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Spreadsheet read failed; snapshotting CSV mirror");
                self.mirror.read_all()?.iter().map(Transaction::to_row).collect()
            }
        };

        let count = rows.iter().filter(|r| !is_header_row(r.as_slice())).count();
        let path = mirror::write_snapshot(dir, &rows, now, SNAPSHOT_RETENTION)?;
        tracing::info!(path = %path.display(), rows = count, "Backup snapshot written");

        Ok(Snapshot { path, rows: count })
    }
}

/// Decode remote rows, skipping the header, blank rows and rows that do not
/// parse.
fn parse_rows(rows: &[Vec<String>]) -> Vec<Transaction> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| !is_header_row(row.as_slice()) && row.iter().any(|c| !c.trim().is_empty()))
        .filter_map(|(index, row)| match Transaction::from_row(row.as_slice()) {
            Ok(tx) => Some(tx),
            Err(reason) => {
                tracing::warn!(row = index + 1, %reason, "Skipping invalid ledger row");
                None
            }
        })
        .collect()
}
