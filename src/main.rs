// Upety Bot - Command line
// One-shot operations against the live ledger: run a scheduled job, check
// the balance, prepare the spreadsheet header

use anyhow::{anyhow, Context, Result};
use std::env;

use upety_bot::app::{init_tracing, App};
use upety_bot::reports::format_rupiah;
use upety_bot::{Config, ReportKind};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("run") => {
            let job = args
                .get(2)
                .ok_or_else(|| anyhow!("Usage: upety run <job>"))?;
            let kind: ReportKind = job.parse().map_err(|e| anyhow!("{e}"))?;
            block_on(run_job(kind))
        }
        Some("balance") => block_on(show_balance()),
        Some("setup") => block_on(setup()),
        Some("jobs") => {
            print_jobs();
            Ok(())
        }
        Some("help") | Some("--help") | Some("-h") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            Err(anyhow!("Unknown command: {other}"))
        }
    }
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    init_tracing();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(future)
}

fn load() -> Result<App> {
    let config = Config::from_env().context("Invalid configuration")?;
    App::build(config)
}

async fn run_job(kind: ReportKind) -> Result<()> {
    let app = load()?;
    let now = app.config.now();

    println!("⏰ Running job: {}", kind.name());
    let delivered = app
        .scheduler
        .run_job(kind, now)
        .await
        .with_context(|| format!("Job {} failed", kind.name()))?;
    println!("✓ Delivered to {delivered} recipient(s)");

    Ok(())
}

async fn show_balance() -> Result<()> {
    let app = load()?;
    let balance = app
        .ledger
        .current_balance(app.config.now())
        .await
        .context("Failed to read ledger")?;

    println!("💰 Saldo: {}", format_rupiah(balance));
    Ok(())
}

async fn setup() -> Result<()> {
    let app = load()?;

    println!("🔧 Checking spreadsheet header...");
    if app.ledger.ensure_header().await.context("Failed to prepare spreadsheet")? {
        println!("✓ Header row written");
    } else {
        println!("✓ Header already present");
    }

    Ok(())
}

fn print_jobs() {
    println!("Scheduled jobs:");
    for kind in ReportKind::ALL {
        println!("  {:<14} {}", kind.name(), kind.cron());
    }
}

fn print_usage() {
    println!("upety {}", upety_bot::VERSION);
    println!();
    println!("Usage:");
    println!("  upety run <job>   Compose and send a scheduled message now");
    println!("  upety balance     Print the current balance");
    println!("  upety setup       Write the spreadsheet header if missing");
    println!("  upety jobs        List scheduled jobs");
    println!();
    println!("Jobs: daily, balance, health, weekly-backup, monthly");
}
