// Journal - local SQLite state next to the ledger
// Processed message ids (duplicate webhook deliveries) and an event log of
// send outcomes and pipeline errors, read back by /status and the health report.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::JournalError;

type Result<T> = std::result::Result<T, JournalError>;

// Event types
pub const MESSAGE_SENT: &str = "message_sent";
pub const SEND_FAILED: &str = "send_failed";
pub const PIPELINE_ERROR: &str = "pipeline_error";
pub const TRANSACTION_RECORDED: &str = "transaction_recorded";
pub const JOB_FIRED: &str = "job_fired";

/// Entry of the event log
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    /// Phone number, job name or message id the event is about
    pub subject: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: &str, subject: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            data,
        }
    }
}

/// Dedup key for an inbound message
pub fn message_hash(sender: &str, message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", sender, message_id));
    format!("{:x}", hasher.finalize())
}

/// Fixed-width UTC timestamps so text order is time order
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// SCHEMA & STATEMENTS
// ============================================================================

pub fn setup_journal(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_messages (
            hash TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            message_id TEXT NOT NULL,
            received_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            subject TEXT NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_type_timestamp ON events(event_type, timestamp)",
        [],
    )?;

    Ok(())
}

/// Record a message as processed. False if it was already recorded.
pub fn mark_processed(conn: &Connection, sender: &str, message_id: &str) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO processed_messages (hash, sender, message_id, received_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            message_hash(sender, message_id),
            sender,
            message_id,
            stamp(Utc::now()),
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, subject, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.event_id,
            stamp(event.timestamp),
            event.event_type,
            event.subject,
            data_json,
        ],
    )?;

    Ok(())
}

/// Most recent event of a type
pub fn last_event(conn: &Connection, event_type: &str) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            "SELECT event_id, timestamp, event_type, subject, data
             FROM events
             WHERE event_type = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
            params![event_type],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((event_id, timestamp, event_type, subject, data)) = row else {
        return Ok(None);
    };

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|_| rusqlite::Error::InvalidQuery)?
        .with_timezone(&Utc);

    Ok(Some(Event {
        event_id,
        timestamp,
        event_type,
        subject,
        data: serde_json::from_str(&data)?,
    }))
}

/// Number of events of `event_type` at or after `since`
pub fn count_events_since(conn: &Connection, event_type: &str, since: DateTime<Utc>) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE event_type = ?1 AND timestamp >= ?2",
        params![event_type, stamp(since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// SHARED HANDLE
// ============================================================================

/// Thread-safe handle shared by the webhook handler and the scheduler.
#[derive(Clone)]
pub struct Journal {
    conn: Arc<Mutex<Connection>>,
}

impl Journal {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
        }

        let conn = Connection::open(path).with_context(|| format!("Failed to open journal {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        setup_journal(&conn).context("Failed to set up journal schema")?;

        Ok(Journal {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_journal(&conn)?;
        Ok(Journal {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| JournalError::Poisoned)
    }

    pub fn mark_processed(&self, sender: &str, message_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        mark_processed(&conn, sender, message_id)
    }

    pub fn insert(&self, event: &Event) -> Result<()> {
        let conn = self.lock()?;
        insert_event(&conn, event)
    }

    /// Append an event, logging instead of failing. The journal never
    /// blocks a reply or a report.
    pub fn record(&self, event_type: &str, subject: &str, data: serde_json::Value) {
        let event = Event::new(event_type, subject, data);
        if let Err(e) = self.insert(&event) {
            tracing::warn!(event_type, subject, error = %e, "Could not write journal event");
        }
    }

    pub fn last(&self, event_type: &str) -> Result<Option<Event>> {
        let conn = self.lock()?;
        last_event(&conn, event_type)
    }

    pub fn count_since(&self, event_type: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock()?;
        count_events_since(&conn, event_type, since)
    }
}
