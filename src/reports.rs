// Reports - every outbound WhatsApp text the bot composes
// Pure functions over ledger data; sending is the caller's job.

use chrono::{DateTime, Datelike, FixedOffset};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

use crate::transaction::{Category, Flow, Transaction};

/// Fixed reply for any downstream failure
pub const GENERIC_ERROR: &str = "❌ Terjadi kesalahan, coba lagi.";

const MONTHS: [&str; 12] = [
    "Januari", "Februari", "Maret", "April", "Mei", "Juni", "Juli", "Agustus", "September",
    "Oktober", "November", "Desember",
];

/// `Rp 1.250.000`, rounded to whole rupiah.
pub fn format_rupiah(amount: Decimal) -> String {
    let rounded = amount.round();
    let digits = rounded.abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-Rp {grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

// ============================================================================
// SUMMARIES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub income: Decimal,
    pub expense: Decimal,
    pub count: usize,
}

impl Summary {
    pub fn of(transactions: &[Transaction]) -> Self {
        let mut summary = Summary::default();
        for tx in transactions {
            match tx.flow {
                Flow::In => summary.income += tx.amount,
                Flow::Out => summary.expense += tx.amount,
            }
            summary.count += 1;
        }
        summary
    }

    pub fn net(&self) -> Decimal {
        self.income - self.expense
    }
}

/// Largest outgoing items by note, biggest first.
pub fn top_expenses(transactions: &[Transaction], limit: usize) -> Vec<(String, Decimal)> {
    let mut totals: HashMap<String, Decimal> = HashMap::new();
    for tx in transactions.iter().filter(|tx| tx.flow == Flow::Out) {
        let key = match tx.note.trim() {
            "" => tx.category.label().to_string(),
            note => note.to_lowercase(),
        };
        *totals.entry(key).or_default() += tx.amount;
    }

    let mut ranked: Vec<(String, Decimal)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

fn flow_emoji(flow: Flow) -> &'static str {
    match flow {
        Flow::In => "📈",
        Flow::Out => "📉",
    }
}

fn advice(summary: &Summary) -> String {
    let mut lines = Vec::new();
    if summary.expense > summary.income {
        lines.push("• ⚠️ Pengeluaran melebihi pemasukan. Perlu kontrol keuangan.");
    }
    if summary.income > Decimal::ZERO {
        lines.push("• ✅ Ada pemasukan. Pertahankan cash flow positif.");
    }
    if lines.is_empty() {
        return String::new();
    }
    format!("\n💡 *Saran:*\n{}\n", lines.join("\n"))
}

fn summary_block(summary: &Summary) -> String {
    format!(
        "📈 *PEMASUKAN:* {}\n📉 *PENGELUARAN:* {}\n📝 *TOTAL TRANSAKSI:* {}\n",
        format_rupiah(summary.income),
        format_rupiah(summary.expense),
        summary.count
    )
}

fn latest_block(transactions: &[Transaction], limit: usize) -> String {
    let start = transactions.len().saturating_sub(limit);
    let mut block = String::from("\n🔍 *TRANSAKSI TERBARU:*\n");
    for (i, tx) in transactions[start..].iter().enumerate() {
        let label = if tx.note.is_empty() { &tx.raw_text } else { &tx.note };
        block.push_str(&format!(
            "{}. {} {} - {}\n",
            i + 1,
            flow_emoji(tx.flow),
            label,
            format_rupiah(tx.amount)
        ));
    }
    block
}

// ============================================================================
// REPORTS
// ============================================================================

/// Report over one window (today, this week, this month).
pub fn period_report(
    title: &str,
    now: DateTime<FixedOffset>,
    transactions: &[Transaction],
    balance: Decimal,
) -> String {
    let mut report = format!(
        "📊 *{title}*\n\n📅 {}\n💰 Saldo: {}\n",
        now.format("%d/%m/%Y"),
        format_rupiah(balance)
    );

    if transactions.is_empty() {
        report.push_str("📝 Tidak ada transaksi\n");
        return report;
    }

    let summary = Summary::of(transactions);
    report.push('\n');
    report.push_str(&summary_block(&summary));
    report.push_str(&latest_block(transactions, 5));
    report.push_str(&advice(&summary));
    report
}

pub fn daily_report(now: DateTime<FixedOffset>, transactions: &[Transaction], balance: Decimal) -> String {
    period_report("LAPORAN HARIAN", now, transactions, balance)
}

pub fn balance_reminder(now: DateTime<FixedOffset>, balance: Decimal) -> String {
    format!(
        "🌅 *REMINDER SALDO PAGI*\n\n\
         💰 *Saldo Terkini:* {}\n\
         📅 {}\n\n\
         💡 *Tips Hari Ini:*\n\
         • Catat semua transaksi dengan detail\n\
         • Kirim foto bukti untuk transaksi penting\n\
         • Ketik \"laporan\" untuk cek laporan harian",
        format_rupiah(balance),
        now.format("%d/%m/%Y")
    )
}

/// Figures for the nightly health report
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStats {
    pub total_transactions: usize,
    pub today_transactions: usize,
    pub errors_last_day: i64,
    pub failed_sends_last_day: i64,
    pub balance: Decimal,
    pub ledger_reachable: bool,
}

pub fn health_report(now: DateTime<FixedOffset>, stats: &HealthStats) -> String {
    let mark = |ok: bool| if ok { "✅" } else { "❌" };
    format!(
        "🤖 *LAPORAN PERFORMA SISTEM*\n\n\
         📅 {}\n\n\
         📊 *STATISTIK:*\n\
         • Total Transaksi: {}\n\
         • Transaksi Hari Ini: {}\n\
         • Error (24 jam): {}\n\
         • Pesan Gagal (24 jam): {}\n\
         • Saldo Terkini: {}\n\n\
         🔧 *STATUS LAYANAN:*\n\
         • Spreadsheet: {}\n\
         • Scheduler: ✅",
        now.format("%d/%m/%Y %H:%M"),
        stats.total_transactions,
        stats.today_transactions,
        stats.errors_last_day,
        stats.failed_sends_last_day,
        format_rupiah(stats.balance),
        mark(stats.ledger_reachable)
    )
}

/// Summary of the calendar month containing `month_of`.
pub fn monthly_report(month_of: DateTime<FixedOffset>, transactions: &[Transaction]) -> String {
    let summary = Summary::of(transactions);
    let month = MONTHS[month_of.month0() as usize];

    let mut report = format!(
        "📈 *LAPORAN BULANAN*\n\n📅 {} {}\n\n\
         💰 *RINGKASAN KEUANGAN:*\n\
         • Total Pemasukan: {}\n\
         • Total Pengeluaran: {}\n\
         • Saldo Bersih: {}\n\
         • Total Transaksi: {}\n",
        month,
        month_of.year(),
        format_rupiah(summary.income),
        format_rupiah(summary.expense),
        format_rupiah(summary.net()),
        summary.count
    );

    let top = top_expenses(transactions, 3);
    if !top.is_empty() {
        report.push_str("\n🏆 *PENGELUARAN TERBESAR:*\n");
        for (i, (note, amount)) in top.iter().enumerate() {
            report.push_str(&format!("{}. {}: {}\n", i + 1, note, format_rupiah(*amount)));
        }
    }

    report.push_str(&advice(&summary));
    report
}

pub fn weekly_backup_notice(path: &Path, rows: usize) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("📦 *BACKUP MINGGUAN*\n\n✅ {rows} transaksi disalin ke {name}")
}

pub fn weekly_backup_failed(reason: &str) -> String {
    format!("📦 *BACKUP MINGGUAN*\n\n❌ Backup gagal: {reason}")
}

// ============================================================================
// REPLIES
// ============================================================================

pub fn help_text() -> String {
    "🤖 *BOS UPETY BOT*\n\n\
     📋 *Cara Penggunaan:*\n\
     • Kirim transaksi: \"beli rokok 25000\"\n\
     • Kirim foto nota (dengan keterangan) untuk bukti\n\
     • Ketik \"laporan\" untuk laporan harian\n\
     • Ketik \"laporan minggu\" / \"laporan bulan\"\n\
     • Ketik \"saldo\" untuk cek saldo\n\n\
     ⏰ *Jadwal Otomatis:*\n\
     • 23:50 - Laporan harian\n\
     • 06:00 - Reminder saldo\n\
     • 00:00 - Laporan performa sistem\n\
     • Minggu 01:00 - Backup mingguan\n\
     • Tanggal 1, 08:00 - Laporan bulanan"
        .to_string()
}

/// Reply to an empty message
pub fn empty_message_hint() -> String {
    "🤔 Pesan kosong. Ketik \"help\" untuk cara penggunaan.".to_string()
}

/// Reply when no amount could be read from the message
pub fn format_hint() -> String {
    "❓ Jumlah tidak ditemukan.\nContoh: \"beli rokok 25000\" atau \"gaji 1,5jt\"".to_string()
}

pub fn balance_reply(now: DateTime<FixedOffset>, balance: Decimal) -> String {
    format!(
        "💰 *SALDO TERKINI*\n\n💵 {}\n📅 {}",
        format_rupiah(balance),
        now.format("%d/%m/%Y %H:%M")
    )
}

/// Confirmation for a recorded transaction, with the balance after it.
pub fn confirmation(tx: &Transaction, balance: Decimal) -> String {
    let emoji = match tx.category {
        Category::Income => "💵",
        Category::Expense => "💸",
        Category::Transfer => "🔁",
    };
    let direction = match (tx.category, tx.flow) {
        (Category::Transfer, Flow::In) => " (masuk)",
        (Category::Transfer, Flow::Out) => " (keluar)",
        _ => "",
    };

    let mut reply = format!(
        "✅ Dicatat: {}\n{} {}\n📂 Kategori: {}{}\n",
        if tx.note.is_empty() { &tx.raw_text } else { &tx.note },
        emoji,
        format_rupiah(tx.amount),
        tx.category.label(),
        direction
    );

    if let Some(attachment) = &tx.attachment {
        reply.push_str(&format!("📎 Bukti: {}\n", attachment.url));
    } else if tx.missing_proof {
        reply.push_str("⚠️ Foto bukti gagal disimpan\n");
    }

    reply.push_str(&format!("💰 Saldo: {}", format_rupiah(balance)));
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{AttachmentReference, Classification};

    fn ts(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn create_test_transaction(note: &str, category: Category, signed: i64) -> Transaction {
        Transaction::new(
            ts("2026-03-14T09:30:00+07:00"),
            "6282181151735",
            note,
            Classification::from_signed(category, Decimal::from(signed), note),
        )
    }

    #[test]
    fn test_format_rupiah() {
        assert_eq!(format_rupiah(Decimal::from(0)), "Rp 0");
        assert_eq!(format_rupiah(Decimal::from(500)), "Rp 500");
        assert_eq!(format_rupiah(Decimal::from(25000)), "Rp 25.000");
        assert_eq!(format_rupiah(Decimal::from(1250000)), "Rp 1.250.000");
        assert_eq!(format_rupiah(Decimal::from(-975000)), "-Rp 975.000");
        assert_eq!(format_rupiah(Decimal::new(15005, 1)), "Rp 1.500");
    }

    #[test]
    fn test_summary_and_top_expenses() {
        let txs = vec![
            create_test_transaction("gaji", Category::Income, 1000000),
            create_test_transaction("beli rokok", Category::Expense, 25000),
            create_test_transaction("Beli Rokok", Category::Expense, 25000),
            create_test_transaction("bensin", Category::Expense, 100000),
            create_test_transaction("parkir", Category::Expense, 5000),
            create_test_transaction("tf ke adik", Category::Transfer, -200000),
        ];

        let summary = Summary::of(&txs);
        assert_eq!(summary.income, Decimal::from(1000000));
        assert_eq!(summary.expense, Decimal::from(355000));
        assert_eq!(summary.count, 6);
        assert_eq!(summary.net(), Decimal::from(645000));

        let top = top_expenses(&txs, 3);
        assert_eq!(top[0], ("tf ke adik".to_string(), Decimal::from(200000)));
        assert_eq!(top[1], ("bensin".to_string(), Decimal::from(100000)));
        assert_eq!(top[2], ("beli rokok".to_string(), Decimal::from(50000)));
    }

    #[test]
    fn test_daily_report_empty_and_full() {
        let now = ts("2026-03-14T23:50:00+07:00");

        let empty = daily_report(now, &[], Decimal::from(975000));
        assert!(empty.contains("14/03/2026"));
        assert!(empty.contains("Rp 975.000"));
        assert!(empty.contains("Tidak ada transaksi"));

        let txs: Vec<Transaction> = (1..=7)
            .map(|i| create_test_transaction(&format!("item {i}"), Category::Expense, 1000 * i))
            .collect();
        let full = daily_report(now, &txs, Decimal::from(0));
        assert!(full.contains("*TOTAL TRANSAKSI:* 7"));
        assert!(full.contains("Rp 28.000"));
        // only the latest five are listed
        assert!(!full.contains("item 2 -"));
        assert!(full.contains("5. 📉 item 7 - Rp 7.000"));
        assert!(full.contains("melebihi pemasukan"));
    }

    #[test]
    fn test_monthly_report() {
        let txs = vec![
            create_test_transaction("gaji", Category::Income, 2000000),
            create_test_transaction("bensin", Category::Expense, 100000),
        ];

        let report = monthly_report(ts("2026-02-28T08:00:00+07:00"), &txs);
        assert!(report.contains("Februari 2026"));
        assert!(report.contains("Saldo Bersih: Rp 1.900.000"));
        assert!(report.contains("1. bensin: Rp 100.000"));
    }

    #[test]
    fn test_confirmation_variants() {
        let plain = create_test_transaction("beli rokok", Category::Expense, 25000);
        let reply = confirmation(&plain, Decimal::from(975000));
        assert!(reply.contains("Dicatat: beli rokok"));
        assert!(reply.contains("Kategori: Pengeluaran"));
        assert!(reply.ends_with("💰 Saldo: Rp 975.000"));

        let missing = create_test_transaction("bukti foto", Category::Expense, 0).with_attachment(None);
        assert!(confirmation(&missing, Decimal::ZERO).contains("gagal disimpan"));

        let stored = create_test_transaction("nota", Category::Expense, 10000).with_attachment(Some(
            AttachmentReference {
                file_id: "f1".to_string(),
                url: "https://drive.google.com/file/d/f1/view".to_string(),
            },
        ));
        assert!(confirmation(&stored, Decimal::ZERO).contains("📎 Bukti: https://drive.google.com/file/d/f1/view"));

        let tf_in = create_test_transaction("tf dari bos", Category::Transfer, 1000000);
        assert!(confirmation(&tf_in, Decimal::ZERO).contains("Transfer (masuk)"));
    }

    #[test]
    fn test_health_report_marks_ledger() {
        let stats = HealthStats {
            total_transactions: 42,
            today_transactions: 3,
            errors_last_day: 1,
            failed_sends_last_day: 0,
            balance: Decimal::from(975000),
            ledger_reachable: false,
        };
        let report = health_report(ts("2026-03-15T00:00:00+07:00"), &stats);

        assert!(report.contains("Total Transaksi: 42"));
        assert!(report.contains("Spreadsheet: ❌"));
    }
}
