//! Chain interaction layer for the soft-liquidation scanner.
//!
//! This crate provides:
//! - An RPC gateway with bounded retries, capped exponential backoff and
//!   rotating fallback endpoints
//! - PoA-tolerant block header decoding for authority chains
//! - Date-to-block resolution via binary search over block timestamps
//! - Controller event signatures and normalization into typed domain events
//! - Cached controller metadata reads (liquidation discount, collateral
//!   decimals)
//!
//! Each network worker owns its own gateway; nothing here is shared across
//! networks.

mod contracts;
mod endpoints;
mod error;
mod events;
mod gateway;
mod resolver;
mod types;

pub use contracts::{ControllerMetaCache, DEFAULT_DECIMALS, DEFAULT_DISCOUNT_PCT};
pub use endpoints::EndpointPool;
pub use error::ChainError;
pub use events::{ControllerEventSignatures, DomainEvent, EventMeta, EventNormalizer};
pub use gateway::{HttpGateway, RetryPolicy, RpcGateway};
pub use resolver::BlockRangeResolver;
pub use types::{BlockRange, RawLogEvent};
