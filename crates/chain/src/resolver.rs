//! Wall-clock date window to block range resolution.
//!
//! Binary search over block timestamps (non-decreasing in block number),
//! looking for the first block whose timestamp is at or past the target.
//! The three outcomes (before genesis, past the head, converged) are kept
//! explicit: collapsing them used to make a failed search return the current
//! head for both bounds and silently scan a single block.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::ChainError;
use crate::gateway::RpcGateway;
use crate::types::BlockRange;

/// Outcome of a single timestamp search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    BeforeGenesis,
    AfterHead,
    Found(u64),
}

/// Resolves a date window into a concrete [`BlockRange`] for one network.
pub struct BlockRangeResolver<'a, G: RpcGateway + ?Sized> {
    gateway: &'a G,
    /// First searchable block. Block 0 is skipped: several RPC providers
    /// refuse to serve the genesis header.
    earliest_block: u64,
}

impl<'a, G: RpcGateway + ?Sized> BlockRangeResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self {
            gateway,
            earliest_block: 1,
        }
    }

    /// Resolve `[start_date, end_date]` to blocks. `None` bounds mean
    /// full history: the earliest block and the current head respectively.
    ///
    /// Never returns an inverted range, and never a single-block range
    /// unless both dates were explicitly equal; those cases surface
    /// [`ChainError::BlockResolutionAmbiguous`] or
    /// [`ChainError::BlockResolutionFailed`] so the caller can skip the
    /// network with a warning instead of scanning a bogus window.
    pub async fn resolve(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<BlockRange, ChainError> {
        let head = self
            .gateway
            .block_number()
            .await
            .map_err(|e| ChainError::BlockResolutionFailed(format!("head lookup: {e}")))?;

        let start_block = match start_date {
            None => self.earliest_block,
            Some(date) => match self.first_block_at_or_after(date.timestamp(), head).await? {
                Resolved::BeforeGenesis => self.earliest_block,
                Resolved::Found(block) => block,
                Resolved::AfterHead => {
                    // The whole window lies in the future; any range built
                    // from the head here would be the degenerate same-block
                    // result we refuse to produce.
                    return Err(ChainError::BlockResolutionAmbiguous(head));
                }
            },
        };

        let end_block = match end_date {
            None => head,
            Some(date) => match self.first_block_at_or_after(date.timestamp(), head).await? {
                Resolved::BeforeGenesis => {
                    return Err(ChainError::BlockResolutionFailed(
                        "end date predates the chain".to_string(),
                    ));
                }
                Resolved::Found(block) => block,
                Resolved::AfterHead => head,
            },
        };

        if start_block > end_block {
            return Err(ChainError::BlockResolutionFailed(format!(
                "start block {start_block} resolves after end block {end_block}"
            )));
        }

        let single_block_requested =
            matches!((start_date, end_date), (Some(s), Some(e)) if s == e);
        if start_block == end_block && !single_block_requested {
            return Err(ChainError::BlockResolutionAmbiguous(start_block));
        }

        info!(
            start_block,
            end_block,
            head,
            "Resolved date window to block range"
        );
        Ok(BlockRange::new(start_block, end_block))
    }

    /// First block with `timestamp >= target`, or the explicit out-of-range
    /// outcome.
    async fn first_block_at_or_after(
        &self,
        target: i64,
        head: u64,
    ) -> Result<Resolved, ChainError> {
        let target = u64::try_from(target)
            .map_err(|_| ChainError::BlockResolutionFailed("date before unix epoch".into()))?;

        let genesis_ts = self.timestamp(self.earliest_block).await?;
        if target <= genesis_ts {
            return Ok(Resolved::BeforeGenesis);
        }
        let head_ts = self.timestamp(head).await?;
        if target > head_ts {
            return Ok(Resolved::AfterHead);
        }

        // Invariant: ts(lo) < target <= ts(hi)
        let mut lo = self.earliest_block;
        let mut hi = head;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            let ts = self.timestamp(mid).await?;
            debug!(mid, ts, target, "Binary search probe");
            if ts >= target {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(Resolved::Found(hi))
    }

    async fn timestamp(&self, block: u64) -> Result<u64, ChainError> {
        self.gateway
            .block_timestamp(block)
            .await
            .map_err(|e| ChainError::BlockResolutionFailed(format!("block {block}: {e}")))
    }
}
