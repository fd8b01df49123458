//! Reconstruction of position epochs from a normalized event stream.
//!
//! Events arrive unordered from chunked scanning. The analyzer sorts them
//! into canonical order, groups them per `(user, controller)` pair and walks
//! each group through a small state machine: `Borrow` opens an epoch, soft
//! liquidations accumulate on the open epoch, and a hard liquidation, a
//! self-liquidation or a full repay closes it. A later `Borrow` for the same
//! pair starts the next epoch (a reopening).

use std::collections::BTreeMap;

use alloy::primitives::Address;
use tracing::{debug, warn};

use softliq_chain::DomainEvent;

use crate::epoch::PositionEpoch;

/// Epochs plus bookkeeping about events that could not be attributed.
#[derive(Debug, Default)]
pub struct AnalysisResult {
    /// All reconstructed epochs, grouped by pair and ordered by epoch index.
    pub epochs: Vec<PositionEpoch>,
    /// Events for a pair whose epoch history exists but is closed, with no
    /// reopening in between. Counted and dropped.
    pub stray_events: u64,
}

/// Single-threaded per group; groups are independent.
#[derive(Debug, Default)]
pub struct PositionLifecycleAnalyzer;

impl PositionLifecycleAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Reconstruct epochs from `events`. Input order does not matter; the
    /// same deduplicated set always yields the same epoch sequence.
    pub fn analyze(&self, mut events: Vec<DomainEvent>) -> AnalysisResult {
        events.sort_by_key(DomainEvent::ordering_key);

        // BTreeMap keeps pair iteration deterministic across runs
        let mut groups: BTreeMap<(Address, Address), Vec<DomainEvent>> = BTreeMap::new();
        for event in events {
            groups
                .entry((event.user(), event.controller()))
                .or_default()
                .push(event);
        }

        let mut result = AnalysisResult::default();
        for ((user, controller), group) in groups {
            self.analyze_pair(user, controller, group, &mut result);
        }
        result
    }

    fn analyze_pair(
        &self,
        user: Address,
        controller: Address,
        events: Vec<DomainEvent>,
        result: &mut AnalysisResult,
    ) {
        let mut history = 0usize;
        let mut current: Option<PositionEpoch> = None;

        for event in events {
            match event {
                DomainEvent::Borrow { .. } => {
                    if let Some(epoch) = &current {
                        // Adding collateral or debt to a live position does
                        // not start a new epoch.
                        debug!(
                            user = %user,
                            controller = %controller,
                            epoch = epoch.epoch_index,
                            "Borrow into open epoch"
                        );
                    } else {
                        current = Some(PositionEpoch::opened(event, history));
                    }
                }
                DomainEvent::SoftLiquidation { .. } => {
                    match current.as_mut() {
                        Some(epoch) => epoch.record_soft_liquidation(event),
                        None if history == 0 => {
                            // Scan window opened mid-epoch
                            let mut epoch = PositionEpoch::truncated(user, controller, 0);
                            epoch.record_soft_liquidation(event);
                            current = Some(epoch);
                        }
                        None => {
                            warn!(
                                user = %user,
                                controller = %controller,
                                "Soft liquidation for a closed position with no reopening; dropped"
                            );
                            result.stray_events += 1;
                        }
                    }
                }
                closing @ (DomainEvent::SelfLiquidation { .. }
                | DomainEvent::HardLiquidation { .. }
                | DomainEvent::Repay { full: true, .. }) => match current.take() {
                    Some(mut epoch) => {
                        epoch.close(closing);
                        history += 1;
                        result.epochs.push(epoch);
                    }
                    None if history == 0 => {
                        let mut epoch = PositionEpoch::truncated(user, controller, 0);
                        epoch.close(closing);
                        history += 1;
                        result.epochs.push(epoch);
                    }
                    None => {
                        warn!(
                            user = %user,
                            controller = %controller,
                            kind = closing.kind(),
                            "Closing event for a closed position with no reopening; dropped"
                        );
                        result.stray_events += 1;
                    }
                },
                DomainEvent::Repay { .. } => {
                    // Partial repay keeps the epoch open. Without any open
                    // epoch it still proves a position existed before the
                    // window.
                    if current.is_none() {
                        if history == 0 {
                            current = Some(PositionEpoch::truncated(user, controller, 0));
                        } else {
                            result.stray_events += 1;
                        }
                    }
                }
            }
        }

        if let Some(epoch) = current {
            result.epochs.push(epoch);
        }
    }
}
