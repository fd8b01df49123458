//! Report assembly: per-network JSON and per-epoch CSV artifacts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use softliq_chain::BlockRange;

use crate::epoch::PositionEpoch;

/// Positions whose soft liquidations wrote down less than this (in
/// stablecoin units, ~USD) are noise and excluded from loss aggregates.
pub const DUST_DEBT_THRESHOLD: f64 = 5.0;

/// Controller skipped before scanning, with the reason surfaced to readers.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedController {
    pub address: Address,
    pub reason: String,
}

/// Aggregate figures over one network's epochs.
///
/// Loss totals count only adversarial soft liquidations: self-liquidated
/// epochs and dust positions are excluded (their epochs stay in the report).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_epochs: usize,
    pub open_epochs: usize,
    pub truncated_epochs: usize,
    pub soft_liquidation_events: usize,
    pub self_liquidated_epochs: usize,
    pub hard_liquidated_epochs: usize,
    pub dust_epochs_excluded: usize,
    pub total_debt_reduced: f64,
    pub total_loss: f64,
}

impl ReportSummary {
    pub fn from_epochs(epochs: &[PositionEpoch]) -> Self {
        let mut summary = Self {
            total_epochs: epochs.len(),
            ..Self::default()
        };

        for epoch in epochs {
            summary.soft_liquidation_events += epoch.soft_liquidation_count();
            if epoch.is_open() {
                summary.open_epochs += 1;
            }
            if epoch.truncated_history {
                summary.truncated_epochs += 1;
            }
            if epoch.is_self_liquidation {
                summary.self_liquidated_epochs += 1;
                continue;
            }
            if matches!(
                epoch.close_event,
                Some(softliq_chain::DomainEvent::HardLiquidation { .. })
            ) {
                summary.hard_liquidated_epochs += 1;
            }
            if epoch.soft_liquidation_count() > 0 && epoch.total_debt_reduced < DUST_DEBT_THRESHOLD
            {
                summary.dust_epochs_excluded += 1;
                continue;
            }
            summary.total_debt_reduced += epoch.total_debt_reduced;
            summary.total_loss += epoch.total_loss;
        }
        summary
    }
}

/// Everything reported for one network in one run.
#[derive(Debug, Serialize)]
pub struct NetworkReport {
    pub network: String,
    pub generated_at: DateTime<Utc>,
    /// Resolved scan range, absent when resolution was skipped.
    pub block_range: Option<BlockRange>,
    pub summary: ReportSummary,
    pub epochs: Vec<PositionEpoch>,
    /// Block sub-ranges per controller that could not be fetched; rerun
    /// candidates.
    pub unresolved_ranges: Vec<(Address, BlockRange)>,
    pub skipped_controllers: Vec<SkippedController>,
    pub unrecognized_events: u64,
    pub stray_events: u64,
}

impl NetworkReport {
    pub fn new(network: impl Into<String>, mut epochs: Vec<PositionEpoch>) -> Self {
        // Chronological for readers; the analyzer groups by pair instead
        epochs.sort_by_key(|e| (e.first_block().unwrap_or(0), e.user, e.epoch_index));
        let summary = ReportSummary::from_epochs(&epochs);
        Self {
            network: network.into(),
            generated_at: Utc::now(),
            block_range: None,
            summary,
            epochs,
            unresolved_ranges: Vec::new(),
            skipped_controllers: Vec::new(),
            unrecognized_events: 0,
            stray_events: 0,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(&file, self)
            .with_context(|| format!("Failed to serialize report for {}", self.network))?;
        writeln!(&file)?;
        info!(network = %self.network, path = %path.display(), "Wrote JSON report");
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
        for epoch in &self.epochs {
            writer.serialize(EpochRow::from_epoch(&self.network, epoch))?;
        }
        writer.flush()?;
        info!(network = %self.network, path = %path.display(), "Wrote CSV report");
        Ok(())
    }
}

/// Flat per-epoch row for the CSV artifact.
#[derive(Debug, Serialize)]
struct EpochRow<'a> {
    network: &'a str,
    user: Address,
    controller: Address,
    epoch_index: usize,
    open_block: Option<u64>,
    open_time: Option<DateTime<Utc>>,
    close_block: Option<u64>,
    close_time: Option<DateTime<Utc>>,
    close_kind: Option<&'static str>,
    soft_liquidations: usize,
    total_debt_reduced: f64,
    total_collateral_sold: f64,
    total_discount_pct: f64,
    total_loss: f64,
    is_self_liquidation: bool,
    truncated_history: bool,
    is_open: bool,
}

impl<'a> EpochRow<'a> {
    fn from_epoch(network: &'a str, epoch: &PositionEpoch) -> Self {
        let open_meta = epoch.open_event.as_ref().map(|e| e.meta());
        let close_meta = epoch.close_event.as_ref().map(|e| e.meta());
        Self {
            network,
            user: epoch.user,
            controller: epoch.controller,
            epoch_index: epoch.epoch_index,
            open_block: open_meta.map(|m| m.block_number),
            open_time: open_meta.and_then(|m| to_datetime(m.timestamp)),
            close_block: close_meta.map(|m| m.block_number),
            close_time: close_meta.and_then(|m| to_datetime(m.timestamp)),
            close_kind: epoch.close_event.as_ref().map(|e| e.kind()),
            soft_liquidations: epoch.soft_liquidation_count(),
            total_debt_reduced: epoch.total_debt_reduced,
            total_collateral_sold: epoch.total_collateral_sold,
            total_discount_pct: epoch.total_discount_pct,
            total_loss: epoch.total_loss,
            is_self_liquidation: epoch.is_self_liquidation,
            truncated_history: epoch.truncated_history,
            is_open: epoch.close_event.is_none(),
        }
    }
}

/// Timestamps are zero when stamping was skipped; those render as empty.
fn to_datetime(timestamp: u64) -> Option<DateTime<Utc>> {
    if timestamp == 0 {
        return None;
    }
    DateTime::from_timestamp(timestamp as i64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256, U256};
    use softliq_chain::{DomainEvent, EventMeta};

    const USER: Address = address!("1111111111111111111111111111111111111111");
    const CONTROLLER: Address = address!("00A89d7a5A02160f20150EbEA7a2b5E4879A1A8b");

    fn epoch(debt_reduced: f64, self_liq: bool, closed: bool) -> PositionEpoch {
        let close_event = closed.then(|| {
            let meta = EventMeta {
                controller: CONTROLLER,
                user: USER,
                block_number: 200,
                transaction_index: 0,
                log_index: 0,
                tx_hash: B256::ZERO,
                timestamp: 1_700_000_000,
                discount_pct: None,
            };
            if self_liq {
                DomainEvent::SelfLiquidation {
                    meta,
                    collateral_received: U256::ZERO,
                    stablecoin_received: U256::ZERO,
                    debt: U256::ZERO,
                }
            } else {
                DomainEvent::HardLiquidation {
                    meta,
                    liquidator: address!("2222222222222222222222222222222222222222"),
                    collateral_received: U256::ZERO,
                    stablecoin_received: U256::ZERO,
                    debt: U256::ZERO,
                }
            }
        });
        PositionEpoch {
            user: USER,
            controller: CONTROLLER,
            epoch_index: 0,
            open_event: None,
            soft_liquidations: Vec::new(),
            close_event,
            is_self_liquidation: self_liq,
            truncated_history: false,
            total_discount_pct: 6.0,
            total_debt_reduced: debt_reduced,
            total_collateral_sold: 0.0,
            total_loss: debt_reduced * 0.06,
        }
    }

    fn with_soft_liq_count(mut e: PositionEpoch, count: usize) -> PositionEpoch {
        let meta = EventMeta {
            controller: CONTROLLER,
            user: USER,
            block_number: 150,
            transaction_index: 0,
            log_index: 0,
            tx_hash: B256::ZERO,
            timestamp: 0,
            discount_pct: Some(6.0),
        };
        for _ in 0..count {
            e.soft_liquidations.push(DomainEvent::SoftLiquidation {
                meta: meta.clone(),
                collateral_sold: U256::ZERO,
                debt_reduced: U256::ZERO,
            });
        }
        e
    }

    #[test]
    fn test_summary_excludes_self_liquidations_and_dust() {
        let epochs = vec![
            with_soft_liq_count(epoch(1000.0, false, true), 2),
            with_soft_liq_count(epoch(500.0, true, true), 1),
            // Below the dust threshold
            with_soft_liq_count(epoch(2.0, false, false), 1),
        ];
        let summary = ReportSummary::from_epochs(&epochs);

        assert_eq!(summary.total_epochs, 3);
        assert_eq!(summary.soft_liquidation_events, 4);
        assert_eq!(summary.self_liquidated_epochs, 1);
        assert_eq!(summary.hard_liquidated_epochs, 1);
        assert_eq!(summary.dust_epochs_excluded, 1);
        assert_eq!(summary.open_epochs, 1);
        assert!((summary.total_debt_reduced - 1000.0).abs() < 1e-9);
        assert!((summary.total_loss - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_csv_rows_flatten_epochs() {
        let report = NetworkReport::new(
            "ethereum",
            vec![with_soft_liq_count(epoch(1000.0, false, true), 2)],
        );

        let mut writer = csv::Writer::from_writer(Vec::new());
        for epoch in &report.epochs {
            writer
                .serialize(EpochRow::from_epoch(&report.network, epoch))
                .unwrap();
        }
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("network,user,controller,epoch_index"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("ethereum,0x1111"));
        assert!(row.contains("HardLiquidation"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_zero_timestamp_renders_empty() {
        assert_eq!(to_datetime(0), None);
        assert!(to_datetime(1_700_000_000).is_some());
    }
}
