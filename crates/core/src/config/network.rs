//! Per-network scan target descriptors.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Default `eth_getLogs` window, matching common provider limits.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// One network to scan: RPC endpoints plus its controller contracts.
/// Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Human-readable network name (e.g. "ethereum", "optimism")
    pub name: String,
    /// Ordered RPC endpoints; the first is the primary, the rest fallbacks.
    /// Supports `${ENV_VAR}` expansion.
    pub rpc_endpoints: Vec<String>,
    /// Authority (PoA) chains need lenient block-header decoding because
    /// their extra-data field exceeds the standard width.
    #[serde(default)]
    pub requires_poa_header_fix: bool,
    /// Log window size override for this network's providers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Controller contracts to scan on this network.
    pub controllers: Vec<ControllerDescriptor>,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

/// One lending controller contract on a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerDescriptor {
    /// Controller contract address
    pub address: Address,
    /// Deployment block. A value of 0 is a known misconfiguration; it is
    /// treated as a hint and clamped to block 1 so a full-history scan does
    /// not start before the chain.
    #[serde(default)]
    pub creation_block: u64,
    /// Collateral token symbol for report labeling
    #[serde(default)]
    pub collateral_token: Option<String>,
    /// Market/platform label (e.g. "crvUSD", "LlamaLend")
    #[serde(default)]
    pub platform: Option<String>,
}

impl ControllerDescriptor {
    /// Earliest block worth scanning for this controller.
    pub fn min_scan_block(&self) -> u64 {
        self.creation_block.max(1)
    }
}
