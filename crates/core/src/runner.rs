//! Per-network scan orchestration.
//!
//! One runner per network, owning its own gateway and endpoint pool; runners
//! share nothing and run concurrently from the binary. The pipeline per
//! network: resolve the date window to blocks, scan each controller in
//! chunks, normalize the raw logs, stamp timestamps and discounts, and hand
//! the sorted stream to the lifecycle analyzer.

use std::collections::{BTreeSet, HashMap};

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use softliq_chain::{
    BlockRange, BlockRangeResolver, ControllerMetaCache, DomainEvent, EventNormalizer,
    HttpGateway, RawLogEvent, RetryPolicy, RpcGateway,
};

use crate::analyzer::PositionLifecycleAnalyzer;
use crate::config::{ControllerDescriptor, NetworkDescriptor};
use crate::epoch::PositionEpoch;
use crate::report::{NetworkReport, SkippedController};
use crate::scanner::{CancelFlag, ChunkedLogScanner, PartialScanResult, ScannerConfig};
use crate::u256_math::to_f64_lossy;

/// Concurrent `eth_getBlockByNumber` lookups while stamping timestamps.
const TIMESTAMP_CONCURRENCY: usize = 8;

/// Scans and analyzes one network end to end.
pub struct NetworkRunner {
    descriptor: NetworkDescriptor,
    gateway: HttpGateway,
    normalizer: EventNormalizer,
    meta_cache: ControllerMetaCache,
    cancel: CancelFlag,
}

impl NetworkRunner {
    pub fn new(descriptor: NetworkDescriptor, cancel: CancelFlag) -> Result<Self> {
        let gateway = HttpGateway::new(
            descriptor.name.clone(),
            &descriptor.rpc_endpoints,
            RetryPolicy::default(),
            descriptor.requires_poa_header_fix,
        )
        .with_context(|| format!("building gateway for network {}", descriptor.name))?;

        info!(
            network = %descriptor.name,
            endpoints = gateway.endpoint_count(),
            controllers = descriptor.controllers.len(),
            poa_header_fix = descriptor.requires_poa_header_fix,
            "Network runner ready"
        );

        Ok(Self {
            descriptor,
            gateway,
            normalizer: EventNormalizer::default(),
            meta_cache: ControllerMetaCache::new(),
            cancel,
        })
    }

    /// Run the full pipeline for this network's date window. `None` bounds
    /// mean full history. A resolution failure aborts only this network.
    pub async fn run(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<NetworkReport> {
        let range = BlockRangeResolver::new(&self.gateway)
            .resolve(start_date, end_date)
            .await
            .with_context(|| format!("resolving date window for {}", self.descriptor.name))?;

        let signatures = self.normalizer.signatures().all_signatures();
        let scanner = ChunkedLogScanner::new(
            &self.gateway,
            ScannerConfig::with_chunk_size(self.descriptor.chunk_size),
            self.cancel.clone(),
        );

        let mut raw_events = Vec::new();
        let mut unresolved = Vec::new();
        let mut skipped = Vec::new();

        for controller in &self.descriptor.controllers {
            if self.cancel.is_cancelled() {
                skipped.push(SkippedController {
                    address: controller.address,
                    reason: "scan cancelled".to_string(),
                });
                continue;
            }

            // An explicitly requested single-block window passed resolver
            // vetting; it bypasses the scanner's degenerate-range guard.
            let single_block = range.len() == 1;
            let effective = match effective_range(range, controller, single_block) {
                Some(effective) => effective,
                None => {
                    warn!(
                        network = %self.descriptor.name,
                        controller = %controller.address,
                        range = %range,
                        creation_block = controller.creation_block,
                        "Controller range is empty within the resolved window; skipping"
                    );
                    skipped.push(SkippedController {
                        address: controller.address,
                        reason: format!("no scannable blocks in {range}"),
                    });
                    continue;
                }
            };

            let partial = if single_block {
                self.fetch_single_block(controller.address, effective, &signatures)
                    .await
            } else {
                scanner
                    .scan(controller.address, effective, &signatures)
                    .await
            };
            unresolved.extend(
                partial
                    .unresolved_ranges
                    .into_iter()
                    .map(|gap| (controller.address, gap)),
            );
            raw_events.extend(partial.events);
        }

        let mut events = self.normalize(&raw_events);
        if !self.cancel.is_cancelled() {
            self.stamp_timestamps(&mut events).await;
            self.stamp_discounts(&mut events).await;
        }

        let analysis = PositionLifecycleAnalyzer::new().analyze(events);
        let mut epochs = analysis.epochs;
        self.stamp_collateral(&mut epochs).await;

        let mut report = NetworkReport::new(self.descriptor.name.clone(), epochs);
        report.block_range = Some(range);
        report.unresolved_ranges = unresolved;
        report.skipped_controllers = skipped;
        report.unrecognized_events = self.normalizer.unrecognized_count();
        report.stray_events = analysis.stray_events;

        info!(
            network = %self.descriptor.name,
            epochs = report.summary.total_epochs,
            soft_liquidations = report.summary.soft_liquidation_events,
            gaps = report.unresolved_ranges.len(),
            "Network scan complete"
        );
        Ok(report)
    }

    /// One-shot fetch for an explicitly requested single-block window.
    async fn fetch_single_block(
        &self,
        controller: Address,
        range: BlockRange,
        signatures: &[B256],
    ) -> PartialScanResult {
        match self.gateway.fetch_logs(controller, range, signatures).await {
            Ok(events) => PartialScanResult {
                events,
                unresolved_ranges: Vec::new(),
            },
            Err(e) => {
                warn!(controller = %controller, range = %range, error = %e, "Single-block fetch failed");
                PartialScanResult {
                    events: Vec::new(),
                    unresolved_ranges: vec![range],
                }
            }
        }
    }

    fn normalize(&self, raw_events: &[RawLogEvent]) -> Vec<DomainEvent> {
        let events: Vec<DomainEvent> = raw_events
            .iter()
            .filter_map(|raw| self.normalizer.normalize(raw))
            .collect();
        info!(
            network = %self.descriptor.name,
            raw = raw_events.len(),
            normalized = events.len(),
            unrecognized = self.normalizer.unrecognized_count(),
            "Normalized scanned logs"
        );
        events
    }

    /// Stamp block timestamps onto events. Failed lookups leave the stamp at
    /// zero; reports render those as empty rather than guessing.
    async fn stamp_timestamps(&self, events: &mut [DomainEvent]) {
        let blocks: BTreeSet<u64> = events.iter().map(|e| e.meta().block_number).collect();
        if blocks.is_empty() {
            return;
        }

        let timestamps: HashMap<u64, u64> = stream::iter(blocks)
            .map(|block| async move { (block, self.gateway.block_timestamp(block).await) })
            .buffer_unordered(TIMESTAMP_CONCURRENCY)
            .filter_map(|(block, result)| async move {
                match result {
                    Ok(timestamp) => Some((block, timestamp)),
                    Err(e) => {
                        warn!(block, error = %e, "Failed to fetch block timestamp");
                        None
                    }
                }
            })
            .collect()
            .await;

        for event in events {
            let meta = event.meta_mut();
            if let Some(timestamp) = timestamps.get(&meta.block_number) {
                meta.timestamp = *timestamp;
            }
        }
    }

    /// Stamp the controller's liquidation discount onto liquidation events.
    /// Cached per controller, so repeats cost nothing.
    async fn stamp_discounts(&self, events: &mut [DomainEvent]) {
        let rpc_url = self.gateway.current_endpoint();
        for event in events {
            if matches!(
                event,
                DomainEvent::SoftLiquidation { .. }
                    | DomainEvent::SelfLiquidation { .. }
                    | DomainEvent::HardLiquidation { .. }
            ) {
                let controller = event.controller();
                let discount = self
                    .meta_cache
                    .liquidation_discount(&rpc_url, controller)
                    .await;
                event.meta_mut().discount_pct = Some(discount);
            }
        }
    }

    /// Convert each epoch's raw collateral into token units using the
    /// controller's collateral decimals.
    async fn stamp_collateral(&self, epochs: &mut [PositionEpoch]) {
        let rpc_url = self.gateway.current_endpoint();
        for epoch in epochs {
            if epoch.soft_liquidation_count() == 0 {
                continue;
            }
            let decimals = if self.cancel.is_cancelled() {
                softliq_chain::DEFAULT_DECIMALS
            } else {
                self.meta_cache
                    .collateral_decimals(&rpc_url, epoch.controller)
                    .await
            };
            epoch.total_collateral_sold = to_f64_lossy(epoch.raw_collateral_sold(), decimals);
        }
    }
}

/// Clamp the resolved window to the controller's deployment block. `None`
/// when nothing scannable remains. A degenerate (single-block) result is
/// kept only when the caller explicitly asked for a single block.
fn effective_range(
    range: BlockRange,
    controller: &ControllerDescriptor,
    allow_single_block: bool,
) -> Option<BlockRange> {
    let start = range.start_block.max(controller.min_scan_block());
    let effective = BlockRange::new(start, range.end_block);
    if effective.is_empty() {
        return None;
    }
    if effective.is_degenerate() && !allow_single_block {
        return None;
    }
    Some(effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn controller(creation_block: u64) -> ControllerDescriptor {
        ControllerDescriptor {
            address: address!("8472A9A7632b173c8Cf3a86D3afec50c35548e76"),
            creation_block,
            collateral_token: None,
            platform: None,
        }
    }

    #[test]
    fn test_effective_range_clamps_to_creation_block() {
        let range = BlockRange::new(1_000, 5_000);

        let clamped = effective_range(range, &controller(2_000), false).unwrap();
        assert_eq!(clamped, BlockRange::new(2_000, 5_000));

        // Deployment before the window leaves the range untouched
        let unchanged = effective_range(range, &controller(500), false).unwrap();
        assert_eq!(unchanged, range);

        // A zero creation block is clamped to block 1, not the chain start
        let hinted = effective_range(range, &controller(0), false).unwrap();
        assert_eq!(hinted, range);
    }

    #[test]
    fn test_effective_range_rejects_empty_windows() {
        let range = BlockRange::new(1_000, 5_000);
        assert!(effective_range(range, &controller(5_000), false).is_none());
        assert!(effective_range(range, &controller(9_000), false).is_none());
    }

    #[test]
    fn test_effective_range_keeps_explicit_single_block() {
        let range = BlockRange::new(5_000, 5_000);
        assert!(effective_range(range, &controller(100), false).is_none());
        assert_eq!(
            effective_range(range, &controller(100), true),
            Some(range)
        );
        // Deployment after the requested block still disqualifies it
        assert!(effective_range(range, &controller(6_000), true).is_none());
    }
}
