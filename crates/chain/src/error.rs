//! Error taxonomy for the chain interaction layer.

use thiserror::Error;

/// Errors surfaced by the RPC gateway and block range resolver.
///
/// Transient transport faults are retried inside the gateway and never appear
/// here; everything in this enum is a per-network or per-controller outcome
/// that the caller decides how to handle. None of these abort the whole run.
#[derive(Error, Debug)]
pub enum ChainError {
    /// All retry attempts and fallback endpoints were exhausted.
    #[error("RPC unavailable after {attempts} attempts across {endpoints} endpoint(s): {last_error}")]
    RpcUnavailable {
        attempts: u32,
        endpoints: usize,
        last_error: String,
    },

    /// A block the resolver or gateway needed could not be retrieved.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// The binary search over block timestamps could not complete.
    #[error("block resolution failed: {0}")]
    BlockResolutionFailed(String),

    /// The resolved range degenerated to a single block without the caller
    /// asking for one. Proceeding would silently scan almost nothing, which
    /// is worse than skipping the network with an explicit warning.
    #[error("block resolution ambiguous: start and end both resolved to block {0}")]
    BlockResolutionAmbiguous(u64),

    /// An endpoint URL in the network descriptor could not be parsed.
    #[error("invalid RPC endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}
