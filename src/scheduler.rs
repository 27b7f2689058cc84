// Scheduler - timed reports to the allow-listed numbers
// Cron expressions are evaluated in the configured local offset. Each job
// fires at most once per slot; slots missed while the process was down are
// skipped, not replayed.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{AllowList, Audience};
use crate::dispatcher::deliver;
use crate::error::{BotError, Result};
use crate::gateway::MessageGateway;
use crate::journal::{self, Journal};
use crate::ledger::LedgerStore;
use crate::reports::{self, HealthStats};
use crate::transaction::Period;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// JOB TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Daily,
    BalanceReminder,
    Health,
    WeeklyBackup,
    Monthly,
}

impl ReportKind {
    pub const ALL: [ReportKind; 5] = [
        ReportKind::Daily,
        ReportKind::BalanceReminder,
        ReportKind::Health,
        ReportKind::WeeklyBackup,
        ReportKind::Monthly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::BalanceReminder => "balance",
            ReportKind::Health => "health",
            ReportKind::WeeklyBackup => "weekly-backup",
            ReportKind::Monthly => "monthly",
        }
    }

    /// sec min hour day-of-month month day-of-week
    pub fn cron(&self) -> &'static str {
        match self {
            ReportKind::Daily => "0 50 23 * * *",
            ReportKind::BalanceReminder => "0 0 6 * * *",
            ReportKind::Health => "0 0 0 * * *",
            ReportKind::WeeklyBackup => "0 0 1 * * Sun",
            ReportKind::Monthly => "0 0 8 1 * *",
        }
    }

    pub fn audience(&self) -> Audience {
        match self {
            ReportKind::Health | ReportKind::WeeklyBackup => Audience::AdminOnly,
            ReportKind::Daily | ReportKind::BalanceReminder | ReportKind::Monthly => Audience::Both,
        }
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ReportKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s.trim().to_lowercase())
            .ok_or_else(|| {
                let names: Vec<&str> = ReportKind::ALL.iter().map(ReportKind::name).collect();
                format!("unknown job {s:?} (expected one of: {})", names.join(", "))
            })
    }
}

/// One scheduled job and its firing state.
#[derive(Debug, Clone)]
pub struct JobState {
    pub kind: ReportKind,
    pub next_fire: Option<DateTime<FixedOffset>>,
    /// Slot most recently fired
    pub last_slot: Option<DateTime<FixedOffset>>,
    schedule: cron::Schedule,
}

impl JobState {
    /// Parse the job's cron expression; the first fire is the next slot after `now`.
    pub fn new(kind: ReportKind, now: DateTime<FixedOffset>) -> Result<Self> {
        let schedule = cron::Schedule::from_str(kind.cron())
            .map_err(|e| BotError::Config(format!("bad cron for {}: {e}", kind.name())))?;

        let mut state = JobState {
            kind,
            next_fire: None,
            last_slot: None,
            schedule,
        };
        state.compute_next_fire(now);
        Ok(state)
    }

    pub fn should_fire(&self, now: DateTime<FixedOffset>) -> bool {
        self.next_fire
            .is_some_and(|slot| now >= slot && self.last_slot != Some(slot))
    }

    pub fn compute_next_fire(&mut self, from: DateTime<FixedOffset>) {
        self.next_fire = self.schedule.after(&from).next();
    }

    /// Record the current slot as fired and move past `now`, so elapsed
    /// slots collapse into this one firing.
    pub fn mark_fired(&mut self, now: DateTime<FixedOffset>) {
        let slot = self.next_fire;
        self.last_slot = slot;
        let from = slot.map_or(now, |s| s.max(now));
        self.compute_next_fire(from);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub job: &'static str,
    pub cron: &'static str,
    pub next_fire: Option<String>,
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct Scheduler {
    allow_list: AllowList,
    gateway: Arc<dyn MessageGateway>,
    ledger: Arc<LedgerStore>,
    journal: Journal,
    backup_dir: PathBuf,
    utc_offset: FixedOffset,
    jobs: Mutex<Vec<JobState>>,
}

impl Scheduler {
    pub fn new(
        allow_list: AllowList,
        gateway: Arc<dyn MessageGateway>,
        ledger: Arc<LedgerStore>,
        journal: Journal,
        backup_dir: PathBuf,
        utc_offset: FixedOffset,
    ) -> Result<Self> {
        let now = Utc::now().with_timezone(&utc_offset);
        let jobs = ReportKind::ALL
            .into_iter()
            .map(|kind| JobState::new(kind, now))
            .collect::<Result<Vec<_>>>()?;

        Ok(Scheduler {
            allow_list,
            gateway,
            ledger,
            journal,
            backup_dir,
            utc_offset,
            jobs: Mutex::new(jobs),
        })
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }

    /// Job table with the next fire time of each job.
    pub fn schedule_info(&self) -> Vec<ScheduleEntry> {
        let jobs = self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.iter()
            .map(|state| ScheduleEntry {
                job: state.kind.name(),
                cron: state.kind.cron(),
                next_fire: state.next_fire.map(|t| t.to_rfc3339()),
            })
            .collect()
    }

    /// Run every job due at `now`. Returns the jobs that fired.
    pub async fn fire_due(&self, now: DateTime<FixedOffset>) -> Vec<ReportKind> {
        let due: Vec<ReportKind> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.iter_mut()
                .filter(|state| state.should_fire(now))
                .map(|state| {
                    state.mark_fired(now);
                    state.kind
                })
                .collect()
        };

        for kind in &due {
            tracing::info!(job = kind.name(), "Scheduled job firing");
            if let Err(e) = self.run_job(*kind, now).await {
                tracing::error!(job = kind.name(), error = %e, "Scheduled job failed");
                self.journal.record(
                    journal::PIPELINE_ERROR,
                    kind.name(),
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }

        due
    }

    /// Tick until `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(jobs = ReportKind::ALL.len(), "Scheduler starting");
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = tick.tick() => {
                    self.fire_due(self.now()).await;
                }
            }
        }
    }

    // ========================================================================
    // JOBS
    // ========================================================================

    /// Compose and send one job's message now. Returns how many recipients
    /// received it.
    pub async fn run_job(&self, kind: ReportKind, now: DateTime<FixedOffset>) -> Result<usize> {
        let text = match kind {
            ReportKind::Daily => {
                let today = self.ledger.read_all(Period::Day, now).await?;
                let balance = self.ledger.current_balance(now).await?;
                reports::daily_report(now, &today, balance)
            }
            ReportKind::BalanceReminder => {
                let balance = self.ledger.current_balance(now).await?;
                reports::balance_reminder(now, balance)
            }
            ReportKind::Health => self.health_report(now).await?,
            ReportKind::WeeklyBackup => match self.ledger.backup_snapshot(&self.backup_dir, now).await {
                Ok(snapshot) => reports::weekly_backup_notice(&snapshot.path, snapshot.rows),
                Err(e) => {
                    tracing::error!(error = %e, "Weekly backup failed");
                    reports::weekly_backup_failed(&e.to_string())
                }
            },
            ReportKind::Monthly => {
                let month_of = previous_month(now);
                let transactions = self.ledger.read_all(Period::Month, month_of).await?;
                reports::monthly_report(month_of, &transactions)
            }
        };

        let mut delivered = 0;
        for recipient in self.allow_list.recipients(kind.audience()) {
            if deliver(self.gateway.as_ref(), &self.journal, &recipient.phone, &text)
                .await
                .is_ok()
            {
                delivered += 1;
            }
        }

        self.journal.record(
            journal::JOB_FIRED,
            kind.name(),
            serde_json::json!({ "delivered": delivered }),
        );
        tracing::info!(job = kind.name(), delivered, "Scheduled job done");
        Ok(delivered)
    }

    async fn health_report(&self, now: DateTime<FixedOffset>) -> Result<String> {
        let ledger_reachable = self.ledger.remote_reachable().await;
        let all = self.ledger.read_all(Period::All, now).await?;
        let today = all
            .iter()
            .filter(|tx| Period::Day.contains(tx.timestamp, now))
            .count();

        let since = now.with_timezone(&Utc) - ChronoDuration::hours(24);
        let stats = HealthStats {
            total_transactions: all.len(),
            today_transactions: today,
            errors_last_day: self.journal.count_since(journal::PIPELINE_ERROR, since)?,
            failed_sends_last_day: self.journal.count_since(journal::SEND_FAILED, since)?,
            balance: crate::transaction::signed_sum(&all)?,
            ledger_reachable,
        };

        Ok(reports::health_report(now, &stats))
    }
}

/// A moment inside the calendar month before `now`.
fn previous_month(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let first = now.with_day(1).unwrap_or(now);
    first - ChronoDuration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CsvMirror;
    use crate::mocks::{FakeGateway, FakeSheet};
    use crate::transaction::{Category, Classification, Transaction};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    const ADMIN: &str = "6282181151735";
    const BOS: &str = "628115302098";

    fn ts(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    struct Harness {
        scheduler: Scheduler,
        gateway: Arc<FakeGateway>,
        sheet: Arc<FakeSheet>,
        ledger: Arc<LedgerStore>,
        journal: Journal,
        dir: TempDir,
    }

    /// Scheduler with only `kinds`, as if started at `start`.
    fn harness(kinds: &[ReportKind], start: DateTime<FixedOffset>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let sheet = Arc::new(FakeSheet::default());
        let journal = Journal::in_memory().unwrap();
        let ledger = Arc::new(LedgerStore::new(
            sheet.clone(),
            CsvMirror::new(dir.path().join("transactions.csv")),
        ));

        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let mut scheduler = Scheduler::new(
            AllowList::new(ADMIN, BOS),
            gateway.clone(),
            ledger.clone(),
            journal.clone(),
            dir.path().join("backups"),
            offset,
        )
        .unwrap();
        scheduler.jobs = Mutex::new(kinds.iter().map(|k| JobState::new(*k, start).unwrap()).collect());

        Harness {
            scheduler,
            gateway,
            sheet,
            ledger,
            journal,
            dir,
        }
    }

    async fn record(h: &Harness, note: &str, category: Category, signed: i64, at: &str) {
        let tx = Transaction::new(
            ts(at),
            BOS,
            note,
            Classification::from_signed(category, Decimal::from(signed), note),
        );
        h.ledger.append(&tx).await.unwrap();
    }

    #[test]
    fn test_every_cron_expression_parses() {
        let now = ts("2026-03-14T12:00:00+07:00");
        for kind in ReportKind::ALL {
            assert!(JobState::new(kind, now).unwrap().next_fire.is_some(), "{}", kind.name());
        }
    }

    #[test]
    fn test_next_fire_in_local_time() {
        // Saturday
        let now = ts("2026-03-14T12:00:00+07:00");
        let next = |kind| JobState::new(kind, now).unwrap().next_fire.unwrap();

        assert_eq!(next(ReportKind::Daily), ts("2026-03-14T23:50:00+07:00"));
        assert_eq!(next(ReportKind::BalanceReminder), ts("2026-03-15T06:00:00+07:00"));
        assert_eq!(next(ReportKind::Health), ts("2026-03-15T00:00:00+07:00"));
        assert_eq!(next(ReportKind::WeeklyBackup), ts("2026-03-15T01:00:00+07:00"));
        assert_eq!(next(ReportKind::Monthly), ts("2026-04-01T08:00:00+07:00"));
    }

    #[test]
    fn test_report_kind_from_str() {
        assert_eq!("weekly-backup".parse::<ReportKind>().unwrap(), ReportKind::WeeklyBackup);
        assert_eq!("Daily".parse::<ReportKind>().unwrap(), ReportKind::Daily);
        assert!("hourly".parse::<ReportKind>().is_err());
    }

    #[test]
    fn test_missed_slots_are_skipped_at_startup() {
        let state = JobState::new(ReportKind::Daily, ts("2026-03-14T23:55:00+07:00")).unwrap();

        assert!(!state.should_fire(ts("2026-03-14T23:55:30+07:00")));
        assert_eq!(state.next_fire, Some(ts("2026-03-15T23:50:00+07:00")));
    }

    #[test]
    fn test_elapsed_slots_collapse_into_one() {
        let mut state = JobState::new(ReportKind::Daily, ts("2026-03-14T12:00:00+07:00")).unwrap();
        // Suspended across two daily slots
        let now = ts("2026-03-16T23:55:00+07:00");

        assert!(state.should_fire(now));
        state.mark_fired(now);

        assert!(!state.should_fire(now));
        assert_eq!(state.last_slot, Some(ts("2026-03-14T23:50:00+07:00")));
        assert_eq!(state.next_fire, Some(ts("2026-03-17T23:50:00+07:00")));
    }

    #[tokio::test]
    async fn test_same_instant_fires_once() {
        let h = harness(&[ReportKind::Daily], ts("2026-03-14T23:49:50+07:00"));
        let slot = ts("2026-03-14T23:50:00+07:00");

        assert_eq!(h.scheduler.fire_due(slot).await, vec![ReportKind::Daily]);
        assert!(h.scheduler.fire_due(slot).await.is_empty());

        // principal and admin, once each
        assert_eq!(h.gateway.sent().len(), 2);
        assert_eq!(h.gateway.sent()[0].0, BOS);
        assert_eq!(h.gateway.sent()[1].0, ADMIN);
    }

    #[tokio::test]
    async fn test_nothing_due_before_slot() {
        let h = harness(&[ReportKind::BalanceReminder], ts("2026-03-14T05:00:00+07:00"));

        assert!(h.scheduler.fire_due(ts("2026-03-14T05:59:59+07:00")).await.is_empty());
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_daily_report_content() {
        let h = harness(&[ReportKind::Daily], ts("2026-03-14T12:00:00+07:00"));
        record(&h, "gaji", Category::Income, 1_000_000, "2026-03-01T08:00:00+07:00").await;
        record(&h, "beli rokok", Category::Expense, 25000, "2026-03-14T09:30:00+07:00").await;

        h.scheduler.fire_due(ts("2026-03-14T23:50:00+07:00")).await;

        let text = &h.gateway.sent_to(BOS)[0];
        assert!(text.contains("LAPORAN HARIAN"));
        assert!(text.contains("Saldo: Rp 975.000"));
        assert!(text.contains("*TOTAL TRANSAKSI:* 1"));
    }

    #[tokio::test]
    async fn test_health_report_goes_to_admin_only() {
        let now = Utc::now().with_timezone(&FixedOffset::east_opt(7 * 3600).unwrap());
        let h = harness(&[ReportKind::Health], now);
        h.journal.record(journal::PIPELINE_ERROR, BOS, serde_json::json!({"error": "x"}));

        let delivered = h.scheduler.run_job(ReportKind::Health, now).await.unwrap();

        assert_eq!(delivered, 1);
        let sent = h.gateway.sent();
        assert_eq!(sent[0].0, ADMIN);
        assert!(sent[0].1.contains("Error (24 jam): 1"));
        assert!(sent[0].1.contains("Spreadsheet: ✅"));
    }

    #[tokio::test]
    async fn test_weekly_backup_writes_snapshot() {
        let h = harness(&[ReportKind::WeeklyBackup], ts("2026-03-14T12:00:00+07:00"));
        record(&h, "beli rokok", Category::Expense, 25000, "2026-03-14T09:30:00+07:00").await;

        h.scheduler.fire_due(ts("2026-03-15T01:00:00+07:00")).await;

        assert!(h.dir.path().join("backups/weekly_backup_20260315.csv").exists());
        let sent = h.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ADMIN);
        assert!(sent[0].1.contains("1 transaksi"));
    }

    #[tokio::test]
    async fn test_monthly_report_covers_previous_month() {
        let h = harness(&[ReportKind::Monthly], ts("2026-03-31T12:00:00+07:00"));
        record(&h, "bensin", Category::Expense, 100000, "2026-03-20T10:00:00+07:00").await;
        record(&h, "parkir", Category::Expense, 5000, "2026-04-01T07:00:00+07:00").await;

        h.scheduler.fire_due(ts("2026-04-01T08:00:00+07:00")).await;

        let text = &h.gateway.sent_to(BOS)[0];
        assert!(text.contains("Maret 2026"));
        assert!(text.contains("Total Pengeluaran: Rp 100.000"));
    }

    #[tokio::test]
    async fn test_send_failure_is_journaled_not_retried() {
        let h = harness(&[ReportKind::BalanceReminder], ts("2026-03-14T05:00:00+07:00"));
        h.gateway.fail_sends(true);

        let slot = ts("2026-03-14T06:00:00+07:00");
        assert_eq!(h.scheduler.fire_due(slot).await, vec![ReportKind::BalanceReminder]);
        assert!(h.scheduler.fire_due(slot + ChronoDuration::seconds(30)).await.is_empty());

        let since = Utc::now() - ChronoDuration::hours(1);
        assert_eq!(h.journal.count_since(journal::SEND_FAILED, since).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ledger_outage_is_journaled() {
        let h = harness(&[ReportKind::Daily], ts("2026-03-14T12:00:00+07:00"));
        h.sheet.fail_reads(true);
        // Unreadable mirror too: a directory where the file should be
        std::fs::create_dir_all(h.dir.path().join("transactions.csv")).unwrap();

        h.scheduler.fire_due(ts("2026-03-14T23:50:00+07:00")).await;

        assert!(h.gateway.sent().is_empty());
        assert!(h.journal.last(journal::PIPELINE_ERROR).unwrap().is_some());
    }

    #[test]
    fn test_schedule_info_lists_jobs() {
        let h = harness(&ReportKind::ALL, ts("2026-03-14T12:00:00+07:00"));
        let info = h.scheduler.schedule_info();

        assert_eq!(info.len(), 5);
        assert_eq!(info[0].job, "daily");
        assert_eq!(info[0].next_fire.as_deref(), Some("2026-03-14T23:50:00+07:00"));
    }
}
