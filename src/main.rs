//! Soft-Liquidation Position Scanner
//!
//! Batch scanner that reconstructs soft-liquidation position histories for
//! leveraged-lending markets across EVM networks. For a wall-clock date
//! window it resolves per-network block ranges, scans controller logs in
//! adaptive chunks, rebuilds per-borrower position epochs (including
//! reopenings), and writes JSON/CSV reports per network.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use softliq_core::{CancelFlag, NetworkReport, NetworkRunner, ScanTargets};

#[derive(Debug, Parser)]
#[command(name = "softliq", version, about = "Soft-liquidation position scanner")]
struct Cli {
    /// Network and controller configuration file
    #[arg(long, default_value = "config/networks.toml")]
    config: PathBuf,

    /// Scan window start, midnight UTC (YYYY-MM-DD). Omit for full history.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Scan window end, midnight UTC (YYYY-MM-DD). Omit for the chain head.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Directory for per-network JSON/CSV reports
    #[arg(long, default_value = "reports")]
    output_dir: PathBuf,
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,softliq_core=debug,softliq_chain=debug")),
        )
        .init();

    let cli = Cli::parse();

    let start_date = cli.start_date.map(midnight_utc);
    let end_date = cli.end_date.map(midnight_utc);
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            bail!("--start-date {start} is after --end-date {end}");
        }
    }

    info!("Starting soft-liquidation scan");
    info!(
        start = %start_date.map(|d| d.to_string()).unwrap_or_else(|| "chain start".into()),
        end = %end_date.map(|d| d.to_string()).unwrap_or_else(|| "chain head".into()),
        "Scan window"
    );

    let targets = ScanTargets::load(&cli.config)?;
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;

    // One cancellation flag shared by every network worker; Ctrl-C makes
    // in-flight scans wind down and report what they have.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing with partial results");
                cancel.cancel();
            }
        });
    }

    // Networks are independent; one worker per network, each owning its own
    // gateway and endpoint pool.
    let mut workers = JoinSet::new();
    for descriptor in targets.networks {
        let cancel = cancel.clone();
        workers.spawn(async move {
            let name = descriptor.name.clone();
            let result = match NetworkRunner::new(descriptor, cancel) {
                Ok(runner) => runner.run(start_date, end_date).await,
                Err(e) => Err(e),
            };
            (name, result)
        });
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((name, Ok(report))) => {
                if let Err(e) = write_reports(&cli.output_dir, &report) {
                    error!(network = %name, error = %e, "Failed to write reports");
                    failed += 1;
                    continue;
                }
                log_outcome(&report);
                completed += 1;
            }
            Ok((name, Err(e))) => {
                error!(network = %name, error = %e, "Network scan failed; skipping");
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Network worker panicked");
                failed += 1;
            }
        }
    }

    info!(completed, failed, "Scan run finished");
    if completed == 0 {
        bail!("all network scans failed");
    }
    Ok(())
}

fn write_reports(output_dir: &Path, report: &NetworkReport) -> Result<()> {
    report.write_json(&output_dir.join(format!("{}.json", report.network)))?;
    report.write_csv(&output_dir.join(format!("{}.csv", report.network)))?;
    Ok(())
}

fn log_outcome(report: &NetworkReport) {
    info!(
        network = %report.network,
        epochs = report.summary.total_epochs,
        soft_liquidations = report.summary.soft_liquidation_events,
        self_liquidated = report.summary.self_liquidated_epochs,
        total_loss = report.summary.total_loss,
        "Network report written"
    );
    if !report.unresolved_ranges.is_empty() {
        warn!(
            network = %report.network,
            gaps = report.unresolved_ranges.len(),
            "Scan completed with unresolved block ranges; rerun to fill them"
        );
    }
}
