// Inbound Dispatcher - one webhook message in, at most one reply out
// Authorization, duplicate suppression, intent routing and the transaction
// and attachment pipelines.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::attachments::{AttachmentOutcome, AttachmentStore};
use crate::classifier::{fallback_parse, image_mime_type, Classifier};
use crate::config::AllowList;
use crate::error::{BotError, Result};
use crate::gateway::{InboundMessage, MessageGateway};
use crate::journal::{self, Journal};
use crate::ledger::LedgerStore;
use crate::reports;
use crate::transaction::{Category, Classification, Period, Transaction};

/// Result of handling one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sender not on the allow-list; nothing was done.
    Rejected,
    /// Message id already processed.
    Duplicate,
    Ok,
    /// The sender got the generic apology, or no reply could be delivered.
    Error,
}

impl DispatchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            DispatchOutcome::Rejected => "rejected",
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Ok => "ok",
            DispatchOutcome::Error => "error",
        }
    }
}

// ============================================================================
// INTENT ROUTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Report(Period),
    Balance,
    Help,
    Attachment,
    Transaction,
    Empty,
}

/// Commands are matched on the first word, case-insensitively.
pub fn route(msg: &InboundMessage) -> Intent {
    let lower = msg.message.trim().to_lowercase();
    let mut words = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()));

    match words.next() {
        Some("laporan") => match words.next() {
            Some("minggu" | "mingguan") => Intent::Report(Period::Week),
            Some("bulan" | "bulanan") => Intent::Report(Period::Month),
            _ => Intent::Report(Period::Day),
        },
        Some("saldo") => Intent::Balance,
        Some("help" | "bantuan") => Intent::Help,
        _ if msg.has_media() => Intent::Attachment,
        Some(_) => Intent::Transaction,
        None => Intent::Empty,
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct Dispatcher {
    allow_list: AllowList,
    gateway: Arc<dyn MessageGateway>,
    classifier: Arc<dyn Classifier>,
    ledger: Arc<LedgerStore>,
    attachments: Arc<dyn AttachmentStore>,
    journal: Journal,
    utc_offset: FixedOffset,
}

impl Dispatcher {
    pub fn new(
        allow_list: AllowList,
        gateway: Arc<dyn MessageGateway>,
        classifier: Arc<dyn Classifier>,
        ledger: Arc<LedgerStore>,
        attachments: Arc<dyn AttachmentStore>,
        journal: Journal,
        utc_offset: FixedOffset,
    ) -> Self {
        Dispatcher {
            allow_list,
            gateway,
            classifier,
            ledger,
            attachments,
            journal,
            utc_offset,
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }

    pub async fn handle(&self, msg: InboundMessage) -> DispatchOutcome {
        let Some(identity) = self.allow_list.authorize(&msg.sender) else {
            let err = BotError::AuthorizationDenied(msg.sender.clone());
            tracing::warn!(sender = %msg.sender, error = %err, "Rejected message");
            return DispatchOutcome::Rejected;
        };
        let sender = identity.phone.clone();

        if let Some(id) = &msg.id {
            match self.journal.mark_processed(&sender, id) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(sender = %sender, message_id = %id, "Duplicate delivery ignored");
                    return DispatchOutcome::Duplicate;
                }
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "Journal unavailable; processing without dedup");
                }
            }
        }

        let intent = route(&msg);
        tracing::info!(sender = %sender, message_id = ?msg.id, ?intent, "Message received");

        let now = self.now();
        let (reply, failed) = match self.reply_for(intent, &sender, &msg, now).await {
            Ok(reply) => (reply, false),
            Err(e) => {
                tracing::error!(sender = %sender, message_id = ?msg.id, error = %e, "Pipeline failed");
                self.journal.record(
                    journal::PIPELINE_ERROR,
                    &sender,
                    serde_json::json!({ "error": e.to_string(), "message_id": msg.id }),
                );
                (reports::GENERIC_ERROR.to_string(), true)
            }
        };

        match deliver(self.gateway.as_ref(), &self.journal, &sender, &reply).await {
            Ok(()) if !failed => DispatchOutcome::Ok,
            _ => DispatchOutcome::Error,
        }
    }

    async fn reply_for(
        &self,
        intent: Intent,
        sender: &str,
        msg: &InboundMessage,
        now: DateTime<FixedOffset>,
    ) -> Result<String> {
        match intent {
            Intent::Help => Ok(reports::help_text()),
            Intent::Empty => Ok(reports::empty_message_hint()),
            Intent::Balance => {
                let balance = self.ledger.current_balance(now).await?;
                Ok(reports::balance_reply(now, balance))
            }
            Intent::Report(period) => self.report(period, now).await,
            Intent::Transaction => self.record_text(sender, msg, now).await,
            Intent::Attachment => self.record_attachment(sender, msg, now).await,
        }
    }

    async fn report(&self, period: Period, now: DateTime<FixedOffset>) -> Result<String> {
        let transactions = self.ledger.read_all(period, now).await?;
        let balance = self.ledger.current_balance(now).await?;

        Ok(match period {
            Period::Month => reports::monthly_report(now, &transactions),
            Period::Week => reports::period_report("LAPORAN MINGGUAN", now, &transactions, balance),
            Period::Day | Period::All => reports::daily_report(now, &transactions, balance),
        })
    }

    // ========================================================================
    // PIPELINES
    // ========================================================================

    /// Model answer, or the naive parse when the model is unusable.
    async fn classify(&self, text: &str) -> Result<Classification> {
        match self.classifier.classify(text).await {
            Ok(classification) => Ok(classification),
            Err(e) => {
                tracing::warn!(error = %e, "Classifier failed; using naive parse");
                fallback_parse(text).ok_or(BotError::ClassificationUnavailable(e))
            }
        }
    }

    /// Model reading of the receipt photo; `None` sends the caption down the text path.
    async fn classify_image(&self, caption: &str, image: &[u8], filename: &str) -> Option<Classification> {
        match self
            .classifier
            .classify_with_image(caption, image, image_mime_type(filename))
            .await
        {
            Ok(classification) => Some(classification),
            Err(e) => {
                tracing::warn!(error = %e, "Image classification failed; using caption only");
                None
            }
        }
    }

    async fn record_text(&self, sender: &str, msg: &InboundMessage, now: DateTime<FixedOffset>) -> Result<String> {
        let classification = match self.classify(&msg.message).await {
            Ok(classification) => classification,
            Err(e @ BotError::ClassificationUnavailable(_)) => {
                tracing::info!(sender, error = %e, "No amount found; sending format hint");
                return Ok(reports::format_hint());
            }
            Err(e) => return Err(e),
        };

        let tx = Transaction::new(now, sender, msg.message.trim(), classification)
            .with_message_id(msg.id.clone());
        self.commit(tx, now).await
    }

    async fn record_attachment(
        &self,
        sender: &str,
        msg: &InboundMessage,
        now: DateTime<FixedOffset>,
    ) -> Result<String> {
        let url = msg.url.as_deref().unwrap_or_default();
        let filename = msg
            .filename
            .clone()
            .unwrap_or_else(|| format!("bukti_{}.jpg", now.format("%Y%m%d_%H%M%S")));

        let (outcome, image) = match self.gateway.fetch_media(url).await {
            Ok(bytes) => {
                let image = bytes.clone();
                (self.attachments.upload(bytes, &filename).await, Some(image))
            }
            Err(e) => (AttachmentOutcome::Degraded { reason: e.to_string() }, None),
        };
        if let AttachmentOutcome::Degraded { reason } = &outcome {
            let err = BotError::AttachmentUploadDegraded(reason.clone());
            tracing::warn!(sender, error = %err, "Recording transaction without proof");
            self.journal.record(
                journal::PIPELINE_ERROR,
                sender,
                serde_json::json!({ "error": err.to_string(), "message_id": msg.id }),
            );
        }

        let caption = msg.message.trim();
        let from_image = match &image {
            Some(image) => self.classify_image(caption, image, &filename).await,
            None => None,
        };
        let classification = match from_image {
            Some(classification) => classification,
            None if caption.is_empty() => photo_only("bukti foto"),
            None => match self.classify(caption).await {
                Ok(classification) => classification,
                // The photo is kept even when the caption carries no amount
                Err(BotError::ClassificationUnavailable(_)) => photo_only(caption),
                Err(e) => return Err(e),
            },
        };

        let raw_text = if caption.is_empty() { "[foto]" } else { caption };
        let tx = Transaction::new(now, sender, raw_text, classification)
            .with_attachment(outcome.reference())
            .with_message_id(msg.id.clone());
        self.commit(tx, now).await
    }

    async fn commit(&self, tx: Transaction, now: DateTime<FixedOffset>) -> Result<String> {
        let receipt = self.ledger.append(&tx).await?;
        self.journal.record(
            journal::TRANSACTION_RECORDED,
            &tx.sender,
            serde_json::json!({
                "amount": tx.signed_amount().to_string(),
                "category": tx.category.as_str(),
                "message_id": tx.message_id,
                "mirrored": receipt.mirrored,
            }),
        );
        tracing::info!(
            sender = %tx.sender,
            message_id = ?tx.message_id,
            category = %tx.category,
            amount = %tx.amount,
            "Transaction recorded"
        );

        let balance = self.ledger.current_balance(now).await?;
        Ok(reports::confirmation(&tx, balance))
    }
}

fn photo_only(note: &str) -> Classification {
    Classification::from_signed(Category::Expense, Decimal::ZERO, note)
}

/// Send one message and journal the outcome.
pub async fn deliver(gateway: &dyn MessageGateway, journal: &Journal, target: &str, text: &str) -> Result<()> {
    match gateway.send(target, text).await {
        Ok(()) => {
            journal.record(journal::MESSAGE_SENT, target, serde_json::json!({ "chars": text.chars().count() }));
            Ok(())
        }
        Err(e) => {
            tracing::error!(recipient = target, error = %e, "Reply not delivered");
            journal.record(journal::SEND_FAILED, target, serde_json::json!({ "error": e.to_string() }));
            Err(BotError::SendFailure(e))
        }
    }
}
