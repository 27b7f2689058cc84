// Error types for the bot
// One enum per collaborator, folded into BotError at the dispatcher seam

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// OUTBOUND HTTP
// ============================================================================

/// Failure of a single outbound call, or of the whole retry sequence.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("{service} unavailable after {attempts} attempts: {last}")]
    Exhausted {
        service: &'static str,
        attempts: u32,
        last: Box<ApiError>,
    },
}

impl ApiError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout => true,
            ApiError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ApiError::Decode(_) | ApiError::Exhausted { .. } => false,
        }
    }
}

// ============================================================================
// COLLABORATORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model answered but the answer could not be turned into a record.
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// All attempts failed at the transport level.
    #[error("classifier unavailable: {0}")]
    Unavailable(#[source] ApiError),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("message to {target} not delivered: {source}")]
    Send {
        target: String,
        #[source]
        source: ApiError,
    },

    #[error("gateway rejected message to {target}: {reason}")]
    Rejected { target: String, reason: String },

    #[error("media download failed: {0}")]
    Media(#[source] ApiError),
}

/// The two sinks of a ledger append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Spreadsheet,
    CsvMirror,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Spreadsheet => write!(f, "spreadsheet"),
            Sink::CsvMirror => write!(f, "csv mirror"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("spreadsheet error: {0}")]
    Remote(#[from] ApiError),

    #[error("csv mirror error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// One sink of the dual write succeeded, the other did not.
    #[error("partial write: {failed} failed: {reason}")]
    PartialWrite { failed: Sink, reason: String },

    #[error("write failed on both sinks: spreadsheet: {remote}; csv mirror: {mirror}")]
    WriteFailed { remote: String, mirror: String },

    #[error("ledger total out of range")]
    Overflow,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("journal serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("journal lock poisoned")]
    Poisoned,
}

// ============================================================================
// DISPATCHER-LEVEL ERROR KINDS
// ============================================================================

#[derive(Debug, Error)]
pub enum BotError {
    #[error("sender {0} is not on the allow-list")]
    AuthorizationDenied(String),

    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(#[source] ClassifierError),

    #[error("partial write failure: {0}")]
    PartialWriteFailure(#[source] LedgerError),

    #[error("attachment upload degraded: {0}")]
    AttachmentUploadDegraded(String),

    #[error("send failure: {0}")]
    SendFailure(#[from] GatewayError),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<LedgerError> for BotError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::PartialWrite { .. } => BotError::PartialWriteFailure(e),
            other => BotError::Ledger(other),
        }
    }
}

impl From<ClassifierError> for BotError {
    fn from(e: ClassifierError) -> Self {
        BotError::ClassificationUnavailable(e)
    }
}
