// Wiring - builds every component from a Config
// Shared by the CLI and the webhook server so both run the same stack.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::attachments::DriveStore;
use crate::classifier::GeminiClassifier;
use crate::config::Config;
use crate::credentials::{FileTokenSource, TokenSource};
use crate::dispatcher::Dispatcher;
use crate::gateway::{FonnteGateway, MessageGateway};
use crate::journal::Journal;
use crate::ledger::{CsvMirror, GoogleSheet, LedgerStore};
use crate::resilient::ResilientClient;
use crate::scheduler::Scheduler;

pub struct App {
    pub config: Config,
    pub gateway: Arc<dyn MessageGateway>,
    pub ledger: Arc<LedgerStore>,
    pub journal: Journal,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
}

impl App {
    /// Missing credentials or an unopenable journal are startup errors.
    pub fn build(config: Config) -> Result<Self> {
        let client = ResilientClient::new(config.retry);
        let tokens: Arc<dyn TokenSource> = Arc::new(
            FileTokenSource::load(&config.credentials_path)
                .context("Google credentials are required for the spreadsheet and file storage")?,
        );

        let gateway: Arc<dyn MessageGateway> = Arc::new(FonnteGateway::new(
            client.clone(),
            &config.endpoints.gateway_send,
            &config.gateway_token,
        ));
        let classifier = Arc::new(GeminiClassifier::new(
            client.clone(),
            &config.endpoints.gemini_base,
            &config.gemini_model,
            &config.gemini_api_key,
        ));
        let sheet = Arc::new(GoogleSheet::new(
            client.clone(),
            &config.endpoints.sheets_base,
            &config.sheet_id,
            &config.sheet_range,
            tokens.clone(),
        ));
        let attachments = Arc::new(DriveStore::new(
            client,
            &config.endpoints.drive_base,
            &config.endpoints.drive_upload_base,
            config.drive_folder_id.clone(),
            tokens,
        ));

        let ledger = Arc::new(LedgerStore::new(sheet, CsvMirror::new(&config.mirror_path)));
        let journal = Journal::open(&config.journal_path)?;

        let dispatcher = Arc::new(Dispatcher::new(
            config.allow_list.clone(),
            gateway.clone(),
            classifier,
            ledger.clone(),
            attachments,
            journal.clone(),
            config.utc_offset,
        ));
        let scheduler = Arc::new(
            Scheduler::new(
                config.allow_list.clone(),
                gateway.clone(),
                ledger.clone(),
                journal.clone(),
                config.backup_dir.clone(),
                config.utc_offset,
            )
            .context("Failed to build job table")?,
        );

        tracing::info!(
            admin = %config.allow_list.admin().phone,
            principal = %config.allow_list.principal().phone,
            sheet = %config.sheet_id,
            model = %config.gemini_model,
            "Components ready"
        );

        Ok(App {
            config,
            gateway,
            ledger,
            journal,
            dispatcher,
            scheduler,
        })
    }
}

/// Install the global `tracing` subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
