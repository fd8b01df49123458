//! One open-to-close lifecycle of a borrower's position on a controller.

use alloy::primitives::{Address, U256};
use serde::Serialize;

use softliq_chain::{DomainEvent, DEFAULT_DISCOUNT_PCT};

use crate::u256_math::wad_to_f64;

/// A position epoch for one `(user, controller)` pair.
///
/// `epoch_index` counts prior epochs of the same pair, so a reopening after a
/// liquidation gets the next index. Once closed an epoch is immutable; a later
/// `Borrow` starts a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionEpoch {
    pub user: Address,
    pub controller: Address,
    pub epoch_index: usize,
    /// The opening `Borrow`. `None` when the scan window started mid-epoch
    /// and the open was never observed.
    pub open_event: Option<DomainEvent>,
    /// Soft liquidations in canonical order.
    pub soft_liquidations: Vec<DomainEvent>,
    /// The closing event, if the epoch closed inside the scanned window.
    pub close_event: Option<DomainEvent>,
    /// Closed by the borrower liquidating themselves. Such epochs stay in the
    /// output for traceability but are excluded from loss aggregates.
    pub is_self_liquidation: bool,
    /// The reconstruction is incomplete: events arrived for this pair before
    /// any observed `Borrow`.
    pub truncated_history: bool,
    /// Sum of the discount percentages applied across soft liquidations.
    pub total_discount_pct: f64,
    /// Stablecoin debt written down by soft liquidations, in token units.
    pub total_debt_reduced: f64,
    /// Collateral sold across soft liquidations, in collateral-token units.
    /// Stamped once the token's decimals are known; zero until then.
    pub total_collateral_sold: f64,
    /// Estimated borrower loss: each write-down times its discount.
    pub total_loss: f64,
}

impl PositionEpoch {
    pub(crate) fn opened(open_event: DomainEvent, epoch_index: usize) -> Self {
        Self::bare(open_event.user(), open_event.controller(), epoch_index, false)
            .with_open(open_event)
    }

    /// Epoch synthesized for events whose opening `Borrow` predates the
    /// scanned window.
    pub(crate) fn truncated(user: Address, controller: Address, epoch_index: usize) -> Self {
        Self::bare(user, controller, epoch_index, true)
    }

    fn bare(user: Address, controller: Address, epoch_index: usize, truncated: bool) -> Self {
        Self {
            user,
            controller,
            epoch_index,
            open_event: None,
            soft_liquidations: Vec::new(),
            close_event: None,
            is_self_liquidation: false,
            truncated_history: truncated,
            total_discount_pct: 0.0,
            total_debt_reduced: 0.0,
            total_collateral_sold: 0.0,
            total_loss: 0.0,
        }
    }

    fn with_open(mut self, event: DomainEvent) -> Self {
        self.open_event = Some(event);
        self
    }

    pub(crate) fn record_soft_liquidation(&mut self, event: DomainEvent) {
        if let DomainEvent::SoftLiquidation {
            ref meta,
            debt_reduced,
            ..
        } = event
        {
            let discount = meta.discount_pct.unwrap_or(DEFAULT_DISCOUNT_PCT);
            let written_down = wad_to_f64(debt_reduced);
            self.total_discount_pct += discount;
            self.total_debt_reduced += written_down;
            self.total_loss += written_down * discount / 100.0;
        }
        self.soft_liquidations.push(event);
    }

    pub(crate) fn close(&mut self, event: DomainEvent) {
        self.is_self_liquidation = matches!(event, DomainEvent::SelfLiquidation { .. });
        self.close_event = Some(event);
    }

    pub fn is_open(&self) -> bool {
        self.close_event.is_none()
    }

    pub fn soft_liquidation_count(&self) -> usize {
        self.soft_liquidations.len()
    }

    /// Raw collateral sold across soft liquidations, before decimal scaling.
    pub fn raw_collateral_sold(&self) -> U256 {
        self.soft_liquidations
            .iter()
            .fold(U256::ZERO, |acc, event| match event {
                DomainEvent::SoftLiquidation {
                    collateral_sold, ..
                } => acc.saturating_add(*collateral_sold),
                _ => acc,
            })
    }

    /// Block of the first observed event, for report ordering.
    pub fn first_block(&self) -> Option<u64> {
        self.open_event
            .as_ref()
            .or_else(|| self.soft_liquidations.first())
            .or(self.close_event.as_ref())
            .map(|e| e.meta().block_number)
    }
}
