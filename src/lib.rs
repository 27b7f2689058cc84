// Upety Bot - Core Library
// WhatsApp bookkeeping assistant: webhook dispatcher, LLM classifier,
// spreadsheet ledger with CSV mirror, receipt storage and scheduled reports

pub mod error;
pub mod config;
pub mod resilient;      // Retry/timeout policy shared by every outbound client
pub mod credentials;
pub mod transaction;
pub mod gateway;        // WhatsApp relay (send + media download)
pub mod classifier;     // LLM classification + naive fallback
pub mod ledger;         // Spreadsheet + CSV mirror
pub mod attachments;    // Receipt photos
pub mod journal;        // SQLite dedup + event log
pub mod reports;
pub mod dispatcher;
pub mod scheduler;
pub mod app;            // Component wiring for the binaries

#[cfg(feature = "server")]
pub mod api;

#[cfg(test)]
mod mocks;

// Re-export commonly used types
pub use error::{ApiError, BotError, ClassifierError, GatewayError, JournalError, LedgerError, Result, Sink};
pub use config::{AllowList, Audience, Config, Endpoints, Role, SenderIdentity};
pub use resilient::{ResilientClient, RetryPolicy};
pub use credentials::{FileTokenSource, StaticToken, TokenSource};
pub use transaction::{
    AttachmentReference, Category, Classification, Flow, Period, Transaction,
    LEDGER_HEADER,
};
pub use gateway::{FonnteGateway, InboundMessage, MessageGateway};
pub use classifier::{fallback_parse, Classifier, GeminiClassifier};
pub use ledger::{AppendReceipt, CsvMirror, GoogleSheet, LedgerStore, RemoteSheet, Snapshot};
pub use attachments::{AttachmentOutcome, AttachmentStore, DriveStore};
pub use journal::{Event, Journal};
pub use dispatcher::{DispatchOutcome, Dispatcher, Intent};
pub use scheduler::{JobState, ReportKind, ScheduleEntry, Scheduler};

#[cfg(feature = "server")]
pub use api::{router, AppState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
