//! Controller event signatures and normalization into domain events.
//!
//! The controller contracts of soft-liquidation lending markets emit a small
//! event set: `Borrow`, `Repay`, `SoftLiquidate` and `Liquidate`. Logs are
//! matched on their Keccak256 topic0 and decoded into [`DomainEvent`]
//! variants; a `Liquidate` whose liquidator equals the borrower becomes a
//! `SelfLiquidation`. Anything else found on the contract is counted and
//! dropped, never treated as an error.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{keccak256, Address, B256, U256};
use serde::Serialize;

use crate::types::RawLogEvent;

/// Keccak256 signatures of the controller events we recognize.
#[derive(Debug, Clone)]
pub struct ControllerEventSignatures {
    /// Borrow(address indexed user, uint256 collateral_increase, uint256 loan_increase)
    pub borrow: B256,
    /// Repay(address indexed user, uint256 collateral_decrease, uint256 loan_decrease, bool full)
    pub repay: B256,
    /// SoftLiquidate(address indexed user, uint256 collateral_sold, uint256 debt_reduced)
    pub soft_liquidate: B256,
    /// Liquidate(address indexed liquidator, address indexed user,
    ///           uint256 collateral_received, uint256 stablecoin_received, uint256 debt)
    pub liquidate: B256,
}

impl ControllerEventSignatures {
    pub fn llamalend() -> Self {
        Self {
            borrow: keccak256("Borrow(address,uint256,uint256)"),
            repay: keccak256("Repay(address,uint256,uint256,bool)"),
            soft_liquidate: keccak256("SoftLiquidate(address,uint256,uint256)"),
            liquidate: keccak256("Liquidate(address,address,uint256,uint256,uint256)"),
        }
    }

    /// All signatures, for the log filter's topic0 set.
    pub fn all_signatures(&self) -> Vec<B256> {
        vec![self.borrow, self.repay, self.soft_liquidate, self.liquidate]
    }
}

impl Default for ControllerEventSignatures {
    fn default() -> Self {
        Self::llamalend()
    }
}

/// Placement and attribution shared by every domain event variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMeta {
    pub controller: Address,
    pub user: Address,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub tx_hash: B256,
    /// Block timestamp (unix seconds). Zero until stamped by the runner;
    /// normalization itself never performs RPC calls.
    pub timestamp: u64,
    /// Controller liquidation discount in percent, stamped for liquidation
    /// variants from the cached on-chain value.
    pub discount_pct: Option<f64>,
}

impl EventMeta {
    fn from_raw(raw: &RawLogEvent, user: Address) -> Self {
        Self {
            controller: raw.address,
            user,
            block_number: raw.block_number,
            transaction_index: raw.transaction_index,
            log_index: raw.log_index,
            tx_hash: raw.transaction_hash,
            timestamp: 0,
            discount_pct: None,
        }
    }
}

/// Typed domain event decoded from a controller log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum DomainEvent {
    Borrow {
        meta: EventMeta,
        collateral_increase: U256,
        loan_increase: U256,
    },
    Repay {
        meta: EventMeta,
        collateral_decrease: U256,
        loan_decrease: U256,
        /// True when the repay cleared the whole debt and closed the loan.
        full: bool,
    },
    SoftLiquidation {
        meta: EventMeta,
        collateral_sold: U256,
        debt_reduced: U256,
    },
    SelfLiquidation {
        meta: EventMeta,
        collateral_received: U256,
        stablecoin_received: U256,
        debt: U256,
    },
    HardLiquidation {
        meta: EventMeta,
        liquidator: Address,
        collateral_received: U256,
        stablecoin_received: U256,
        debt: U256,
    },
}

impl DomainEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::Borrow { meta, .. }
            | Self::Repay { meta, .. }
            | Self::SoftLiquidation { meta, .. }
            | Self::SelfLiquidation { meta, .. }
            | Self::HardLiquidation { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut EventMeta {
        match self {
            Self::Borrow { meta, .. }
            | Self::Repay { meta, .. }
            | Self::SoftLiquidation { meta, .. }
            | Self::SelfLiquidation { meta, .. }
            | Self::HardLiquidation { meta, .. } => meta,
        }
    }

    pub fn user(&self) -> Address {
        self.meta().user
    }

    pub fn controller(&self) -> Address {
        self.meta().controller
    }

    /// Canonical event order: block, then transaction, then log position.
    /// Arrival order from chunked scanning is meaningless.
    pub fn ordering_key(&self) -> (u64, u64, u64) {
        let meta = self.meta();
        (meta.block_number, meta.transaction_index, meta.log_index)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Borrow { .. } => "Borrow",
            Self::Repay { .. } => "Repay",
            Self::SoftLiquidation { .. } => "SoftLiquidation",
            Self::SelfLiquidation { .. } => "SelfLiquidation",
            Self::HardLiquidation { .. } => "HardLiquidation",
        }
    }

    /// Whether this event closes an open position epoch.
    pub fn closes_epoch(&self) -> bool {
        match self {
            Self::SelfLiquidation { .. } | Self::HardLiquidation { .. } => true,
            Self::Repay { full, .. } => *full,
            _ => false,
        }
    }
}

/// Decodes raw controller logs into domain events.
///
/// Unrecognized topic0 values are expected (controllers emit unrelated
/// bookkeeping events); they increment a counter and are otherwise ignored.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    sigs: ControllerEventSignatures,
    unrecognized: AtomicU64,
}

impl EventNormalizer {
    pub fn new(sigs: ControllerEventSignatures) -> Self {
        Self {
            sigs,
            unrecognized: AtomicU64::new(0),
        }
    }

    pub fn signatures(&self) -> &ControllerEventSignatures {
        &self.sigs
    }

    /// Number of logs dropped because their signature was not recognized.
    pub fn unrecognized_count(&self) -> u64 {
        self.unrecognized.load(Ordering::Relaxed)
    }

    pub fn normalize(&self, raw: &RawLogEvent) -> Option<DomainEvent> {
        let Some(topic0) = raw.topic0() else {
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let decoded = if topic0 == self.sigs.borrow {
            parse_borrow(raw)
        } else if topic0 == self.sigs.repay {
            parse_repay(raw)
        } else if topic0 == self.sigs.soft_liquidate {
            parse_soft_liquidate(raw)
        } else if topic0 == self.sigs.liquidate {
            parse_liquidate(raw)
        } else {
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if decoded.is_none() {
            // Right signature but malformed payload; counts as unrecognized.
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
        }
        decoded
    }
}

fn address_from_topic(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

fn word(data: &[u8], index: usize) -> Option<U256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return None;
    }
    Some(U256::from_be_slice(&data[start..end]))
}

fn bool_word(data: &[u8], index: usize) -> Option<bool> {
    word(data, index).map(|w| !w.is_zero())
}

/// Borrow(address indexed user, uint256 collateral_increase, uint256 loan_increase)
fn parse_borrow(raw: &RawLogEvent) -> Option<DomainEvent> {
    if raw.topics.len() < 2 {
        return None;
    }
    let user = address_from_topic(&raw.topics[1]);
    Some(DomainEvent::Borrow {
        meta: EventMeta::from_raw(raw, user),
        collateral_increase: word(&raw.data, 0)?,
        loan_increase: word(&raw.data, 1)?,
    })
}

/// Repay(address indexed user, uint256 collateral_decrease, uint256 loan_decrease, bool full)
fn parse_repay(raw: &RawLogEvent) -> Option<DomainEvent> {
    if raw.topics.len() < 2 {
        return None;
    }
    let user = address_from_topic(&raw.topics[1]);
    Some(DomainEvent::Repay {
        meta: EventMeta::from_raw(raw, user),
        collateral_decrease: word(&raw.data, 0)?,
        loan_decrease: word(&raw.data, 1)?,
        full: bool_word(&raw.data, 2)?,
    })
}

/// SoftLiquidate(address indexed user, uint256 collateral_sold, uint256 debt_reduced)
fn parse_soft_liquidate(raw: &RawLogEvent) -> Option<DomainEvent> {
    if raw.topics.len() < 2 {
        return None;
    }
    let user = address_from_topic(&raw.topics[1]);
    Some(DomainEvent::SoftLiquidation {
        meta: EventMeta::from_raw(raw, user),
        collateral_sold: word(&raw.data, 0)?,
        debt_reduced: word(&raw.data, 1)?,
    })
}

/// Liquidate(address indexed liquidator, address indexed user,
///           uint256 collateral_received, uint256 stablecoin_received, uint256 debt)
///
/// Liquidator == borrower means the user unwound their own position; that is
/// a self-liquidation and is excluded from adversarial-loss aggregates
/// downstream, but still closes the epoch.
fn parse_liquidate(raw: &RawLogEvent) -> Option<DomainEvent> {
    if raw.topics.len() < 3 {
        return None;
    }
    let liquidator = address_from_topic(&raw.topics[1]);
    let user = address_from_topic(&raw.topics[2]);
    let collateral_received = word(&raw.data, 0)?;
    let stablecoin_received = word(&raw.data, 1)?;
    let debt = word(&raw.data, 2)?;

    let meta = EventMeta::from_raw(raw, user);
    if liquidator == user {
        Some(DomainEvent::SelfLiquidation {
            meta,
            collateral_received,
            stablecoin_received,
            debt,
        })
    } else {
        Some(DomainEvent::HardLiquidation {
            meta,
            liquidator,
            collateral_received,
            stablecoin_received,
            debt,
        })
    }
}
