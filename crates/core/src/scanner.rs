//! Chunked, fault-tolerant log retrieval over a block range.
//!
//! The scanner walks a range in consecutive windows, fetching several
//! windows concurrently up to a bound. A window that keeps failing is split
//! in half and retried down to single blocks, so one bad sub-range cannot
//! sink the events already fetched; whatever remains unresolvable is
//! reported as a gap alongside the collected events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use softliq_chain::{BlockRange, RawLogEvent, RpcGateway};

/// Cooperative cancellation shared between the operator signal handler and
/// in-flight scans. Cancelled scans return accumulated partial results.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scanner tuning knobs.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Initial window size in blocks.
    pub chunk_size: u64,
    /// Ceiling the window may grow back to after clean batches.
    pub max_chunk_size: u64,
    /// Concurrent window fetches per controller. Kept modest because the
    /// windows share the provider's rate limit.
    pub max_concurrent: usize,
    /// Whole-window retries before splitting it. The gateway already
    /// retries each call across endpoints, so this stays small.
    pub max_window_attempts: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            max_chunk_size: 10_000,
            max_concurrent: 4,
            max_window_attempts: 2,
        }
    }
}

impl ScannerConfig {
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            max_chunk_size: chunk_size,
            ..Self::default()
        }
    }
}

/// Success-with-gaps outcome of a scan. Not an error: callers surface the
/// gaps and keep the events.
#[derive(Debug, Default)]
pub struct PartialScanResult {
    /// Deduplicated events, in arrival order (not canonical order).
    pub events: Vec<RawLogEvent>,
    /// Sub-ranges that exhausted retries or were cut off by cancellation.
    pub unresolved_ranges: Vec<BlockRange>,
}

impl PartialScanResult {
    pub fn is_complete(&self) -> bool {
        self.unresolved_ranges.is_empty()
    }
}

/// Outcome of one window fetch, possibly after recursive splitting.
struct WindowOutcome {
    events: Vec<RawLogEvent>,
    unresolved: Vec<BlockRange>,
    /// True when the window had to be split; the outer loop shrinks
    /// subsequent windows in response.
    split: bool,
}

/// Walks a block range in adaptive windows against one controller.
pub struct ChunkedLogScanner<'a, G: RpcGateway + ?Sized> {
    gateway: &'a G,
    config: ScannerConfig,
    cancel: CancelFlag,
}

impl<'a, G: RpcGateway + ?Sized> ChunkedLogScanner<'a, G> {
    pub fn new(gateway: &'a G, config: ScannerConfig, cancel: CancelFlag) -> Self {
        Self {
            gateway,
            config,
            cancel,
        }
    }

    /// Scan `range` for logs from `controller` matching `signatures`.
    ///
    /// Returns deduplicated events plus any unresolved gaps. A misconfigured
    /// range (`start >= end`) is skipped as a no-op, never scanned.
    pub async fn scan(
        &self,
        controller: Address,
        range: BlockRange,
        signatures: &[B256],
    ) -> PartialScanResult {
        if range.is_degenerate() {
            warn!(
                controller = %controller,
                range = %range,
                "Skipping degenerate block range"
            );
            return PartialScanResult::default();
        }

        let mut result = PartialScanResult::default();
        let mut seen: HashSet<(B256, u64)> = HashSet::new();
        let mut window_size = self.config.chunk_size.max(1);
        let mut cursor = range.start_block;

        while cursor <= range.end_block {
            if self.cancel.is_cancelled() {
                // Remaining work becomes one reported gap
                result
                    .unresolved_ranges
                    .push(BlockRange::new(cursor, range.end_block));
                info!(
                    controller = %controller,
                    from = cursor,
                    "Scan cancelled, returning partial results"
                );
                break;
            }

            // Next batch of consecutive windows at the current size
            let mut windows = Vec::with_capacity(self.config.max_concurrent);
            while windows.len() < self.config.max_concurrent && cursor <= range.end_block {
                let window_end = range.end_block.min(cursor.saturating_add(window_size - 1));
                windows.push(BlockRange::new(cursor, window_end));
                cursor = window_end + 1;
            }

            let outcomes = join_all(
                windows
                    .iter()
                    .map(|window| self.fetch_window(controller, *window, signatures)),
            )
            .await;

            let mut any_split = false;
            for outcome in outcomes {
                any_split |= outcome.split;
                result.unresolved_ranges.extend(outcome.unresolved);
                for event in outcome.events {
                    if seen.insert(event.key()) {
                        result.events.push(event);
                    }
                }
            }

            // Adapt: shrink after trouble, creep back up after clean batches
            if any_split {
                window_size = (window_size / 2).max(1);
            } else {
                window_size = (window_size * 2).min(self.config.max_chunk_size);
            }
        }

        info!(
            controller = %controller,
            range = %range,
            events = result.events.len(),
            gaps = result.unresolved_ranges.len(),
            "Chunked scan finished"
        );
        result
    }

    /// Fetch one window, splitting recursively on persistent failure.
    fn fetch_window<'s>(
        &'s self,
        controller: Address,
        window: BlockRange,
        signatures: &'s [B256],
    ) -> BoxFuture<'s, WindowOutcome> {
        async move {
            let mut attempt = 0;
            while attempt < self.config.max_window_attempts && !self.cancel.is_cancelled() {
                match self.gateway.fetch_logs(controller, window, signatures).await {
                    Ok(events) => {
                        return WindowOutcome {
                            events,
                            unresolved: Vec::new(),
                            split: false,
                        };
                    }
                    Err(e) => {
                        warn!(
                            controller = %controller,
                            window = %window,
                            attempt,
                            error = %e,
                            "Window fetch failed"
                        );
                    }
                }
                attempt += 1;
            }

            if self.cancel.is_cancelled() || window.len() <= 1 {
                return WindowOutcome {
                    events: Vec::new(),
                    unresolved: vec![window],
                    split: true,
                };
            }

            // Halve and retry both sides; completed half-results survive
            // even if the other half stays unresolved.
            let mid = window.start_block + (window.end_block - window.start_block) / 2;
            let left = BlockRange::new(window.start_block, mid);
            let right = BlockRange::new(mid + 1, window.end_block);
            debug!(window = %window, left = %left, right = %right, "Splitting failed window");

            let mut outcome = self.fetch_window(controller, left, signatures).await;
            let right_outcome = self.fetch_window(controller, right, signatures).await;
            outcome.events.extend(right_outcome.events);
            outcome.unresolved.extend(right_outcome.unresolved);
            outcome.split = true;
            outcome
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use softliq_chain::ChainError;

    const CONTROLLER: Address = address!("00A89d7a5A02160f20150EbEA7a2b5E4879A1A8b");

    /// Gateway with one synthetic event every 10 blocks; any window touching
    /// a block in `failing` errors out.
    struct FakeGateway {
        failing: BTreeSet<u64>,
        calls: Mutex<Vec<BlockRange>>,
        /// When true, each response duplicates its first event to exercise
        /// in-response dedup.
        duplicate_first: bool,
    }

    impl FakeGateway {
        fn new(failing: impl IntoIterator<Item = u64>) -> Self {
            Self {
                failing: failing.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
                duplicate_first: false,
            }
        }

        fn event_at(block: u64) -> RawLogEvent {
            RawLogEvent {
                address: CONTROLLER,
                block_number: block,
                transaction_hash: B256::with_last_byte((block % 251) as u8),
                transaction_index: 0,
                log_index: block,
                topics: vec![B256::ZERO],
                data: Bytes::new(),
            }
        }

        fn expected_blocks(range: BlockRange) -> BTreeSet<u64> {
            (range.start_block..=range.end_block)
                .filter(|b| b % 10 == 0)
                .collect()
        }
    }

    #[async_trait]
    impl RpcGateway for FakeGateway {
        async fn fetch_logs(
            &self,
            _controller: Address,
            range: BlockRange,
            _signatures: &[B256],
        ) -> Result<Vec<RawLogEvent>, ChainError> {
            self.calls.lock().unwrap().push(range);
            if self
                .failing
                .iter()
                .any(|b| (range.start_block..=range.end_block).contains(b))
            {
                return Err(ChainError::RpcUnavailable {
                    attempts: 5,
                    endpoints: 1,
                    last_error: "simulated".to_string(),
                });
            }
            let mut events: Vec<RawLogEvent> = (range.start_block..=range.end_block)
                .filter(|b| b % 10 == 0)
                .map(Self::event_at)
                .collect();
            if self.duplicate_first {
                if let Some(first) = events.first().cloned() {
                    events.push(first);
                }
            }
            Ok(events)
        }

        async fn block_timestamp(&self, _block: u64) -> Result<u64, ChainError> {
            unimplemented!("not used by the scanner")
        }

        async fn block_number(&self) -> Result<u64, ChainError> {
            unimplemented!("not used by the scanner")
        }
    }

    fn blocks_of(result: &PartialScanResult) -> BTreeSet<u64> {
        result.events.iter().map(|e| e.block_number).collect()
    }

    #[tokio::test]
    async fn test_split_invariance() {
        let range = BlockRange::new(100, 799);
        let expected = FakeGateway::expected_blocks(range);

        for chunk_size in [7u64, 50, 100, 1000] {
            let gateway = FakeGateway::new([]);
            let scanner = ChunkedLogScanner::new(
                &gateway,
                ScannerConfig::with_chunk_size(chunk_size),
                CancelFlag::new(),
            );
            let result = scanner.scan(CONTROLLER, range, &[]).await;
            assert!(result.is_complete(), "chunk_size {chunk_size}");
            assert_eq!(blocks_of(&result), expected, "chunk_size {chunk_size}");
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_completed_chunks() {
        // Blocks 200..=201 always fail; everything else succeeds.
        let gateway = FakeGateway::new([200, 201]);
        let scanner = ChunkedLogScanner::new(
            &gateway,
            ScannerConfig {
                chunk_size: 50,
                max_chunk_size: 50,
                max_concurrent: 2,
                max_window_attempts: 1,
            },
            CancelFlag::new(),
        );

        let range = BlockRange::new(100, 299);
        let result = scanner.scan(CONTROLLER, range, &[]).await;

        // All events outside the poisoned blocks survive
        let mut expected = FakeGateway::expected_blocks(range);
        expected.remove(&200);
        assert_eq!(blocks_of(&result), expected);

        // The unresolved gaps cover exactly the poisoned blocks
        let unresolved: BTreeSet<u64> = result
            .unresolved_ranges
            .iter()
            .flat_map(|r| r.start_block..=r.end_block)
            .collect();
        assert_eq!(unresolved, BTreeSet::from([200, 201]));
    }

    #[tokio::test]
    async fn test_duplicates_are_removed() {
        let mut gateway = FakeGateway::new([]);
        gateway.duplicate_first = true;
        let scanner = ChunkedLogScanner::new(
            &gateway,
            ScannerConfig::with_chunk_size(20),
            CancelFlag::new(),
        );

        let range = BlockRange::new(100, 199);
        let result = scanner.scan(CONTROLLER, range, &[]).await;

        let keys: Vec<_> = result.events.iter().map(RawLogEvent::key).collect();
        let unique: HashSet<_> = keys.iter().copied().collect();
        assert_eq!(keys.len(), unique.len());
        assert_eq!(blocks_of(&result), FakeGateway::expected_blocks(range));
    }

    #[tokio::test]
    async fn test_degenerate_range_is_skipped() {
        let gateway = FakeGateway::new([]);
        let scanner = ChunkedLogScanner::new(
            &gateway,
            ScannerConfig::default(),
            CancelFlag::new(),
        );

        let result = scanner
            .scan(CONTROLLER, BlockRange::new(500, 100), &[])
            .await;
        assert!(result.events.is_empty());
        assert!(result.is_complete());
        assert!(gateway.calls.lock().unwrap().is_empty(), "no RPC calls made");

        let single = scanner
            .scan(CONTROLLER, BlockRange::new(500, 500), &[])
            .await;
        assert!(single.events.is_empty());
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_results() {
        let gateway = FakeGateway::new([]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let scanner =
            ChunkedLogScanner::new(&gateway, ScannerConfig::with_chunk_size(10), cancel);

        let range = BlockRange::new(100, 999);
        let result = scanner.scan(CONTROLLER, range, &[]).await;

        assert!(result.events.is_empty());
        assert_eq!(result.unresolved_ranges, vec![range]);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_grows_back_after_clean_batches() {
        let gateway = FakeGateway::new([]);
        let scanner = ChunkedLogScanner::new(
            &gateway,
            ScannerConfig {
                chunk_size: 8,
                max_chunk_size: 64,
                max_concurrent: 1,
                max_window_attempts: 1,
            },
            CancelFlag::new(),
        );

        let result = scanner
            .scan(CONTROLLER, BlockRange::new(0, 500), &[])
            .await;
        assert!(result.is_complete());

        let widths: Vec<u64> = gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.len())
            .collect();
        // 8, 16, 32, then capped at 64
        assert_eq!(&widths[..4], &[8, 16, 32, 64]);
        assert!(widths.iter().all(|w| *w <= 64));
    }
}
