//! Typed controller contract reads for report enrichment.
//!
//! Uses Alloy `sol!` bindings for the two view calls the analyzer's loss
//! math needs: the controller's liquidation discount and the collateral
//! token's decimals. Both are cached per controller and fall back to
//! protocol-typical defaults when the call fails, so metadata problems never
//! abort a scan.

use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use alloy::sol;
use dashmap::DashMap;
use tracing::{debug, warn};

// Vyper-style view methods exposed by soft-liquidation controllers.
sol! {
    #[sol(rpc)]
    interface IController {
        function collateral_token() external view returns (address);
        function liquidation_discount() external view returns (uint256);
    }

    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
    }
}

/// Typical liquidation discount when the controller call fails (6%).
pub const DEFAULT_DISCOUNT_PCT: f64 = 6.0;

/// Typical ERC-20 decimals when the token call fails.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Cached per-controller metadata reader.
#[derive(Debug, Default)]
pub struct ControllerMetaCache {
    discounts: DashMap<Address, f64>,
    decimals: DashMap<Address, u8>,
}

impl ControllerMetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Liquidation discount in percent (e.g. 6.0 for 6%).
    ///
    /// The contract returns an 18-decimal fraction (0.06e18 for 6%).
    pub async fn liquidation_discount(&self, rpc_url: &str, controller: Address) -> f64 {
        if let Some(cached) = self.discounts.get(&controller) {
            return *cached;
        }

        let discount = match self.read_discount(rpc_url, controller).await {
            Ok(discount) => {
                debug!(controller = %controller, discount, "Fetched liquidation discount");
                discount
            }
            Err(e) => {
                warn!(
                    controller = %controller,
                    error = %e,
                    "Failed to fetch liquidation discount, using {DEFAULT_DISCOUNT_PCT}%"
                );
                DEFAULT_DISCOUNT_PCT
            }
        };
        self.discounts.insert(controller, discount);
        discount
    }

    /// Decimals of the controller's collateral token.
    pub async fn collateral_decimals(&self, rpc_url: &str, controller: Address) -> u8 {
        if let Some(cached) = self.decimals.get(&controller) {
            return *cached;
        }

        let decimals = match self.read_decimals(rpc_url, controller).await {
            Ok(decimals) => {
                debug!(controller = %controller, decimals, "Fetched collateral decimals");
                decimals
            }
            Err(e) => {
                warn!(
                    controller = %controller,
                    error = %e,
                    "Failed to fetch collateral decimals, using {DEFAULT_DECIMALS}"
                );
                DEFAULT_DECIMALS
            }
        };
        self.decimals.insert(controller, decimals);
        decimals
    }

    async fn read_discount(&self, rpc_url: &str, controller: Address) -> anyhow::Result<f64> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let contract = IController::new(controller, &provider);
        let raw = contract.liquidation_discount().call().await?._0;
        let raw = u128::try_from(raw).map_err(|_| anyhow::anyhow!("discount out of range"))?;
        // 18-decimal fraction to percent
        Ok(raw as f64 / 1e18 * 100.0)
    }

    async fn read_decimals(&self, rpc_url: &str, controller: Address) -> anyhow::Result<u8> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let contract = IController::new(controller, &provider);
        let token = contract.collateral_token().call().await?._0;
        let erc20 = IERC20::new(token, &provider);
        Ok(erc20.decimals().call().await?._0)
    }
}
