// Transaction model - one row of the append-only ledger
// Shared row layout for the spreadsheet and the local CSV mirror

use chrono::{DateTime, Datelike, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Largest amount one row may carry: Rp 1.000.000.000.000.000
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// Column headers, in row order.
pub const LEDGER_HEADER: [&str; 11] = [
    "Timestamp",
    "Sender",
    "Text",
    "Category",
    "Flow",
    "Amount",
    "Note",
    "AttachmentId",
    "AttachmentUrl",
    "MissingProof",
    "MessageId",
];

// ============================================================================
// CATEGORY & FLOW
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Expense,
    Income,
    Transfer,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Expense => "expense",
            Category::Income => "income",
            Category::Transfer => "transfer",
        }
    }

    /// Label used in WhatsApp replies
    pub fn label(&self) -> &'static str {
        match self {
            Category::Expense => "Pengeluaran",
            Category::Income => "Pemasukan",
            Category::Transfer => "Transfer",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expense" | "pengeluaran" | "out" => Ok(Category::Expense),
            "income" | "pemasukan" | "in" => Ok(Category::Income),
            "transfer" | "tf" => Ok(Category::Transfer),
            other => Err(format!("unknown category: {other:?}")),
        }
    }
}

/// Direction of money relative to the ledger owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    In,
    Out,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::In => "in",
            Flow::Out => "out",
        }
    }
}

impl FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" => Ok(Flow::In),
            "out" => Ok(Flow::Out),
            other => Err(format!("unknown flow: {other:?}")),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Structured reading of a free-text message, before it becomes a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub flow: Flow,
    /// Always non-negative
    pub amount: Decimal,
    pub note: String,
}

impl Classification {
    /// Build from a signed amount as produced by the model.
    ///
    /// Expense is always outgoing and income always incoming, whatever the
    /// sign; a transfer takes its direction from the sign.
    pub fn from_signed(category: Category, signed: Decimal, note: impl Into<String>) -> Self {
        let flow = match category {
            Category::Expense => Flow::Out,
            Category::Income => Flow::In,
            Category::Transfer if signed.is_sign_negative() => Flow::Out,
            Category::Transfer => Flow::In,
        };

        Classification {
            category,
            flow,
            amount: signed.abs(),
            note: note.into(),
        }
    }
}

// ============================================================================
// ATTACHMENT REFERENCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentReference {
    pub file_id: String,
    pub url: String,
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: DateTime<FixedOffset>,
    pub sender: String,
    pub raw_text: String,
    pub category: Category,
    pub flow: Flow,
    pub amount: Decimal,
    pub note: String,
    pub attachment: Option<AttachmentReference>,
    /// Set when a photo was sent but could not be stored
    pub missing_proof: bool,
    pub message_id: Option<String>,
}

impl Transaction {
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        sender: &str,
        raw_text: &str,
        classification: Classification,
    ) -> Self {
        Transaction {
            timestamp,
            sender: sender.to_string(),
            raw_text: raw_text.to_string(),
            category: classification.category,
            flow: classification.flow,
            amount: classification.amount,
            note: classification.note,
            attachment: None,
            missing_proof: false,
            message_id: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<AttachmentReference>) -> Self {
        self.missing_proof = attachment.is_none();
        self.attachment = attachment;
        self
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    /// Positive for money in, negative for money out
    pub fn signed_amount(&self) -> Decimal {
        match self.flow {
            Flow::In => self.amount,
            Flow::Out => -self.amount,
        }
    }

    /// Encode as a ledger row (see `LEDGER_HEADER`).
    pub fn to_row(&self) -> Vec<String> {
        let (file_id, url) = match &self.attachment {
            Some(a) => (a.file_id.clone(), a.url.clone()),
            None => (String::new(), String::new()),
        };

        vec![
            self.timestamp.to_rfc3339(),
            self.sender.clone(),
            self.raw_text.clone(),
            self.category.as_str().to_string(),
            self.flow.as_str().to_string(),
            self.amount.normalize().to_string(),
            self.note.clone(),
            file_id,
            url,
            if self.missing_proof { "yes" } else { "no" }.to_string(),
            self.message_id.clone().unwrap_or_default(),
        ]
    }

    /// Decode a ledger row. Trailing empty cells may be missing, as the
    /// spreadsheet API trims them.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, String> {
        let cell = |i: usize| row.get(i).map(|c| c.as_ref().trim()).unwrap_or("");

        let timestamp = DateTime::parse_from_rfc3339(cell(0))
            .map_err(|e| format!("bad timestamp {:?}: {e}", cell(0)))?;
        let category = Category::from_str(cell(3))?;
        let flow = Flow::from_str(cell(4))?;
        let amount = Decimal::from_str(cell(5)).map_err(|e| format!("bad amount {:?}: {e}", cell(5)))?;
        if amount.is_sign_negative() {
            return Err(format!("negative amount {amount}"));
        }
        if amount > MAX_AMOUNT {
            return Err(format!("amount {amount} above limit"));
        }

        let attachment = if cell(7).is_empty() {
            None
        } else {
            Some(AttachmentReference {
                file_id: cell(7).to_string(),
                url: cell(8).to_string(),
            })
        };
        let message_id = Some(cell(10).to_string()).filter(|s| !s.is_empty());

        Ok(Transaction {
            timestamp,
            sender: cell(1).to_string(),
            raw_text: cell(2).to_string(),
            category,
            flow,
            amount,
            note: cell(6).to_string(),
            attachment,
            missing_proof: cell(9).eq_ignore_ascii_case("yes"),
            message_id,
        })
    }
}

/// Whether a row is the header row
pub fn is_header_row<S: AsRef<str>>(row: &[S]) -> bool {
    row.first().map(|c| c.as_ref().trim()) == Some(LEDGER_HEADER[0])
}

/// Signed sum over the given transactions
pub fn signed_sum(transactions: &[Transaction]) -> Result<Decimal, LedgerError> {
    transactions
        .iter()
        .try_fold(Decimal::ZERO, |total, tx| total.checked_add(tx.signed_amount()))
        .ok_or(LedgerError::Overflow)
}

// ============================================================================
// PERIODS
// ============================================================================

/// Reporting window, evaluated in the offset of `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    /// ISO week, Monday first
    Week,
    Month,
    All,
}

impl Period {
    pub fn contains(&self, ts: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> bool {
        let local = ts.with_timezone(now.offset());
        match self {
            Period::Day => local.date_naive() == now.date_naive(),
            Period::Week => local.iso_week() == now.iso_week(),
            Period::Month => local.year() == now.year() && local.month() == now.month(),
            Period::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn create_test_transaction(amount: Decimal, category: Category, flow: Flow) -> Transaction {
        Transaction {
            timestamp: ts("2026-03-14T09:30:00+07:00"),
            sender: "6282181151735".to_string(),
            raw_text: "beli rokok 25000".to_string(),
            category,
            flow,
            amount,
            note: "beli rokok".to_string(),
            attachment: None,
            missing_proof: false,
            message_id: Some("msg-1".to_string()),
        }
    }

    #[test]
    fn test_from_signed_directions() {
        let expense = Classification::from_signed(Category::Expense, Decimal::from(25000), "rokok");
        assert_eq!(expense.flow, Flow::Out);
        assert_eq!(expense.amount, Decimal::from(25000));

        let income = Classification::from_signed(Category::Income, Decimal::from(-500000), "gaji");
        assert_eq!(income.flow, Flow::In);
        assert_eq!(income.amount, Decimal::from(500000));

        let tf_out = Classification::from_signed(Category::Transfer, Decimal::from(-100000), "tf ke adik");
        assert_eq!(tf_out.flow, Flow::Out);
        assert_eq!(tf_out.amount, Decimal::from(100000));
    }

    #[test]
    fn test_row_round_trip_with_attachment() {
        let tx = create_test_transaction(Decimal::from(25000), Category::Expense, Flow::Out).with_attachment(
            Some(AttachmentReference {
                file_id: "abc".to_string(),
                url: "https://drive.google.com/file/d/abc/view".to_string(),
            }),
        );

        let row = tx.to_row();
        assert_eq!(row.len(), LEDGER_HEADER.len());
        assert_eq!(row[5], "25000");
        assert_eq!(row[9], "no");

        let decoded = Transaction::from_row(&row).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_from_row_accepts_trimmed_trailing_cells() {
        let row = vec![
            "2026-03-14T09:30:00+07:00",
            "628115302098",
            "tf dari bos 1000000",
            "income",
            "in",
            "1000000",
        ];

        let tx = Transaction::from_row(&row).unwrap();
        assert_eq!(tx.signed_amount(), Decimal::from(1000000));
        assert!(tx.attachment.is_none());
        assert!(tx.message_id.is_none());
    }

    #[test]
    fn test_from_row_rejects_negative_amount() {
        let mut row = create_test_transaction(Decimal::from(10), Category::Expense, Flow::Out).to_row();
        row[5] = "-10".to_string();

        assert!(Transaction::from_row(&row).is_err());
    }

    #[test]
    fn test_signed_sum() {
        let txs = vec![
            create_test_transaction(Decimal::from(1000000), Category::Income, Flow::In),
            create_test_transaction(Decimal::from(25000), Category::Expense, Flow::Out),
            create_test_transaction(Decimal::from(100000), Category::Transfer, Flow::Out),
        ];

        assert_eq!(signed_sum(&txs).unwrap(), Decimal::from(875000));
    }

    #[test]
    fn test_signed_sum_overflow_is_an_error() {
        let huge = Decimal::MAX - Decimal::from(1);
        let txs = vec![
            create_test_transaction(huge, Category::Income, Flow::In),
            create_test_transaction(huge, Category::Income, Flow::In),
        ];

        assert!(matches!(signed_sum(&txs), Err(LedgerError::Overflow)));
    }

    #[test]
    fn test_from_row_rejects_amount_above_limit() {
        assert_eq!(MAX_AMOUNT, Decimal::from(1_000_000_000_000_000i64));

        let mut row = create_test_transaction(Decimal::from(10), Category::Expense, Flow::Out).to_row();
        row[5] = "50000000000000000000000000000".to_string();
        assert!(Transaction::from_row(&row).is_err());

        row[5] = MAX_AMOUNT.to_string();
        assert_eq!(Transaction::from_row(&row).unwrap().amount, MAX_AMOUNT);
    }

    #[test]
    fn test_missing_proof_flag() {
        let tx = create_test_transaction(Decimal::from(0), Category::Expense, Flow::Out).with_attachment(None);
        assert!(tx.missing_proof);
        assert_eq!(tx.to_row()[9], "yes");
    }

    #[test]
    fn test_period_windows() {
        let now = ts("2026-03-14T23:50:00+07:00"); // Saturday
        let same_day_utc = ts("2026-03-14T01:00:00+00:00");
        let monday = ts("2026-03-09T08:00:00+07:00");
        let prev_week = ts("2026-03-08T08:00:00+07:00");
        let feb = ts("2026-02-28T08:00:00+07:00");

        assert!(Period::Day.contains(same_day_utc, now));
        assert!(!Period::Day.contains(monday, now));
        assert!(Period::Week.contains(monday, now));
        assert!(!Period::Week.contains(prev_week, now));
        assert!(Period::Month.contains(prev_week, now));
        assert!(!Period::Month.contains(feb, now));
        assert!(Period::All.contains(feb, now));
    }

    #[test]
    fn test_header_detection() {
        let header: Vec<String> = LEDGER_HEADER.iter().map(|s| s.to_string()).collect();
        assert!(is_header_row(&header));
        assert!(!is_header_row(&create_test_transaction(Decimal::from(1), Category::Income, Flow::In).to_row()));
    }
}
