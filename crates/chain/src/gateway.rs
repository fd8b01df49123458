//! RPC gateway: log queries and block lookups with retry and fail-over.
//!
//! Each network worker owns one [`HttpGateway`] wrapping that network's
//! endpoint pool. Calls are retried on transient failures (rate limits,
//! 5xx, timeouts, truncated bodies) with capped exponential backoff, rotating
//! through fallback endpoints; only after the whole pool has been walked does
//! a call surface [`ChainError::RpcUnavailable`].

use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, U64};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::endpoints::EndpointPool;
use crate::error::ChainError;
use crate::types::{BlockRange, RawLogEvent};

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per call (each attempt may hit a different endpoint).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Hard timeout for a single RPC round-trip.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given attempt (attempt 0 has none).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
        exp.min(self.max_delay)
    }
}

/// Transient failures are retried; anything else fails the call immediately.
fn is_transient(err: &RpcError<TransportErrorKind>) -> bool {
    match err {
        // Connection resets, backend-gone, HTTP-level faults
        RpcError::Transport(_) => true,
        // Truncated or malformed response body
        RpcError::DeserError { .. } => true,
        RpcError::NullResp => true,
        RpcError::ErrorResp(payload) => {
            let code = payload.code;
            if code == 429 || code == -32005 || (500..600).contains(&code) {
                return true;
            }
            let message = payload.message.to_lowercase();
            message.contains("rate") || message.contains("too many") || message.contains("limit")
        }
        _ => false,
    }
}

/// Read-only RPC surface used by the resolver and the chunked scanner.
///
/// A trait so both can be exercised against a scripted mock; the production
/// implementation is [`HttpGateway`].
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Fetch logs emitted by `controller` within `range` matching any of the
    /// given topic0 signatures.
    async fn fetch_logs(
        &self,
        controller: Address,
        range: BlockRange,
        signatures: &[B256],
    ) -> Result<Vec<RawLogEvent>, ChainError>;

    /// Unix timestamp of the given block.
    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError>;

    /// Current chain head.
    async fn block_number(&self) -> Result<u64, ChainError>;
}

/// Minimal block-header shape for authority (PoA) chains.
///
/// PoA chains put oversized validator data in the header's extra-data field,
/// which trips strict header decoding. The gateway only ever needs the
/// timestamp, so on flagged networks it deserializes just these fields and
/// ignores everything else, extra-data included. An earlier version that
/// decoded the full header silently truncated scans to a single block on
/// such chains.
#[derive(Debug, Deserialize)]
struct PoaBlockStamp {
    timestamp: U64,
}

/// HTTP JSON-RPC gateway over a rotating endpoint pool.
#[derive(Debug)]
pub struct HttpGateway {
    network: String,
    pool: EndpointPool,
    retry: RetryPolicy,
    poa_header_fix: bool,
}

impl HttpGateway {
    pub fn new(
        network: impl Into<String>,
        endpoints: &[String],
        retry: RetryPolicy,
        poa_header_fix: bool,
    ) -> Result<Self, ChainError> {
        Ok(Self {
            network: network.into(),
            pool: EndpointPool::new(endpoints)?,
            retry,
            poa_header_fix,
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.pool.len()
    }

    /// Current endpoint URL, for contract-call collaborators.
    pub fn current_endpoint(&self) -> String {
        self.pool.url_for_attempt(0).to_string()
    }

    fn unavailable(&self, attempts: u32, last_error: String) -> ChainError {
        ChainError::RpcUnavailable {
            attempts,
            endpoints: self.pool.len(),
            last_error,
        }
    }
}

/// Runs `$call` against rotating endpoints with the gateway's retry policy.
///
/// A macro rather than a generic helper: each attempt builds a fresh
/// provider against the current endpoint, and the provider's concrete type
/// never needs naming this way.
macro_rules! with_retry {
    ($self:expr, $op:literal, |$provider:ident| $call:expr) => {{
        'retry: {
            let mut last_error = String::from("no attempts made");
            let mut attempt = 0u32;
            while attempt < $self.retry.max_attempts {
                let delay = $self.retry.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let url = $self.pool.url_for_attempt(attempt).to_string();
                let parsed = match url.parse() {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        last_error = format!("bad endpoint {url}: {e}");
                        attempt += 1;
                        continue;
                    }
                };
                let $provider = ProviderBuilder::new().on_http(parsed);
                match timeout($self.retry.call_timeout, $call).await {
                    Err(_) => {
                        warn!(
                            network = %$self.network,
                            op = $op,
                            url = %url,
                            attempt,
                            "RPC call timed out"
                        );
                        last_error = "call timed out".to_string();
                    }
                    Ok(Err(e)) if is_transient(&e) => {
                        warn!(
                            network = %$self.network,
                            op = $op,
                            url = %url,
                            attempt,
                            error = %e,
                            "Transient RPC failure, backing off"
                        );
                        last_error = e.to_string();
                    }
                    Ok(Err(e)) => {
                        warn!(
                            network = %$self.network,
                            op = $op,
                            url = %url,
                            error = %e,
                            "Non-retryable RPC failure"
                        );
                        break 'retry Err($self.unavailable(attempt + 1, e.to_string()));
                    }
                    Ok(Ok(value)) => {
                        $self.pool.mark_healthy(attempt);
                        break 'retry Ok(value);
                    }
                }
                attempt += 1;
            }
            // Start the next call from a different endpoint.
            $self.pool.rotate();
            Err($self.unavailable($self.retry.max_attempts, last_error))
        }
    }};
}

#[async_trait]
impl RpcGateway for HttpGateway {
    async fn fetch_logs(
        &self,
        controller: Address,
        range: BlockRange,
        signatures: &[B256],
    ) -> Result<Vec<RawLogEvent>, ChainError> {
        let filter = Filter::new()
            .address(controller)
            .event_signature(signatures.to_vec())
            .from_block(range.start_block)
            .to_block(range.end_block);

        let logs =
            with_retry!(self, "eth_getLogs", |provider| provider.get_logs(&filter))?;

        let mut events = Vec::with_capacity(logs.len());
        let mut pending = 0usize;
        for log in &logs {
            match RawLogEvent::from_log(log) {
                Some(event) => events.push(event),
                None => pending += 1,
            }
        }
        if pending > 0 {
            debug!(
                network = %self.network,
                controller = %controller,
                pending,
                "Dropped logs without block placement"
            );
        }
        debug!(
            network = %self.network,
            controller = %controller,
            range = %range,
            count = events.len(),
            "Fetched logs"
        );
        Ok(events)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError> {
        if self.poa_header_fix {
            let stamp: Option<PoaBlockStamp> =
                with_retry!(self, "eth_getBlockByNumber", |provider| provider
                    .raw_request(
                        "eth_getBlockByNumber".into(),
                        (BlockNumberOrTag::Number(block), false),
                    ))?;
            let stamp = stamp.ok_or(ChainError::BlockNotFound(block))?;
            return Ok(stamp.timestamp.to::<u64>());
        }

        let header = with_retry!(self, "eth_getBlockByNumber", |provider| provider
            .get_block_by_number(BlockNumberOrTag::Number(block)))?;
        let header = header.ok_or(ChainError::BlockNotFound(block))?;
        Ok(header.header.timestamp)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        with_retry!(self, "eth_blockNumber", |provider| provider
            .get_block_number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(20),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        // Capped from here on
        assert_eq!(policy.delay_for(6), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), Duration::from_secs(8));
    }

    #[test]
    fn test_poa_stamp_tolerates_oversized_extra_data() {
        // Captured eth_getBlockByNumber body from an authority chain. The
        // extra-data field carries the validator set and proposer seal, far
        // past the 32 bytes a strict header decode allows; only the
        // timestamp must survive.
        let body = r#"{
            "number": "0x7048960",
            "hash": "0x0e8a9c8f1a4c4a2cc5b8e2f4f9a0d8b91a3c5e7d9f1b3d5f7a9c1e3b5d7f9a1c",
            "parentHash": "0x1b3d5f7a9c1e3b5d7f9a1c0e8a9c8f1a4c4a2cc5b8e2f4f9a0d8b91a3c5e7d9f",
            "miner": "0x0000000000000000000000000000000000000000",
            "extraData": "0xd883010a17846765746888676f312e31382e35856c696e757800000000000000f8b5c0c080b841f6a9d1c3e5b7a9f1d3c5e7b9a1f3d5c7e9b1a3f5d7c9e1b3a5f7d9c1e3b5a7f9d1c3e5b7a9f1d3c5e7b9a1f3d5c7e9b1a3f5d7c9e1b3a5f7d9c1e3b5a7f9d1c301",
            "timestamp": "0x66f2a4c1",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x5208"
        }"#;
        let stamp: PoaBlockStamp = serde_json::from_str(body).unwrap();
        assert_eq!(stamp.timestamp.to::<u64>(), 0x66f2a4c1);
    }

    #[test]
    fn test_gateway_rejects_empty_endpoint_list() {
        let err = HttpGateway::new("testnet", &[], RetryPolicy::default(), false).unwrap_err();
        assert!(matches!(err, ChainError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_block_number_live() {
        let gateway = HttpGateway::new(
            "ethereum",
            &["https://eth.llamarpc.com".to_string()],
            RetryPolicy::default(),
            false,
        )
        .unwrap();
        assert!(gateway.block_number().await.unwrap() > 0);
    }
}
