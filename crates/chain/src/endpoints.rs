//! Rotating RPC endpoint pool with round-robin fail-over.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ChainError;

/// Ordered pool of RPC endpoints for one network.
///
/// The first endpoint in the descriptor is the primary; the rest are
/// fallbacks. Within a call, fail-over is driven purely by the attempt
/// number offsetting from a shared cursor, so consecutive attempts walk
/// the whole pool in order. The cursor itself only moves between calls:
/// pinned to the endpoint that last answered, or bumped once when a call
/// exhausts its retries. Chunk workers share one pool per network; the
/// cursor is a single atomic, so rotation never contends.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Build a pool from endpoint URLs. Fails only if none is usable.
    pub fn new(urls: &[String]) -> Result<Self, ChainError> {
        let mut endpoints = Vec::with_capacity(urls.len());
        for url in urls {
            if url.starts_with("http://") || url.starts_with("https://") {
                endpoints.push(url.clone());
            } else {
                tracing::warn!(url = %url, "Skipping non-HTTP RPC endpoint");
            }
        }
        if endpoints.is_empty() {
            return Err(ChainError::InvalidEndpoint {
                url: urls.first().cloned().unwrap_or_default(),
                reason: "no usable HTTP endpoints configured".to_string(),
            });
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of endpoints in the pool.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint to use for the given attempt number.
    ///
    /// Attempt 0 uses the current cursor position; each subsequent attempt
    /// rotates forward, so a call that keeps failing walks the whole pool
    /// before its retries exhaust.
    pub fn url_for_attempt(&self, attempt: u32) -> &str {
        let base = self.cursor.load(Ordering::Relaxed);
        &self.endpoints[(base + attempt as usize) % self.endpoints.len()]
    }

    /// Pin the cursor to the endpoint that served the given attempt, so the
    /// next call starts there instead of retrying a dead primary.
    pub fn mark_healthy(&self, attempt: u32) {
        if attempt == 0 {
            return;
        }
        let base = self.cursor.load(Ordering::Relaxed);
        self.cursor.store(
            (base + attempt as usize) % self.endpoints.len(),
            Ordering::Relaxed,
        );
    }

    /// Advance the cursor so the next call starts from a different endpoint.
    pub fn rotate(&self) {
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_order() {
        let pool = EndpointPool::new(&[
            "http://primary.invalid".to_string(),
            "http://fallback-a.invalid".to_string(),
            "http://fallback-b.invalid".to_string(),
        ])
        .unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.url_for_attempt(0), "http://primary.invalid");
        assert_eq!(pool.url_for_attempt(1), "http://fallback-a.invalid");
        assert_eq!(pool.url_for_attempt(2), "http://fallback-b.invalid");
        // Wraps around
        assert_eq!(pool.url_for_attempt(3), "http://primary.invalid");

        // After a rotation the pool starts from the next endpoint
        pool.rotate();
        assert_eq!(pool.url_for_attempt(0), "http://fallback-a.invalid");
    }

    #[test]
    fn test_failover_walks_whole_pool() {
        let pool = EndpointPool::new(&[
            "http://primary.invalid".to_string(),
            "http://fallback.invalid".to_string(),
        ])
        .unwrap();

        // A call that keeps failing asks for consecutive attempt numbers
        // without moving the cursor; it must alternate between both
        // endpoints rather than hammer the primary.
        let visited: Vec<&str> = (0..5).map(|a| pool.url_for_attempt(a)).collect();
        assert_eq!(
            visited,
            [
                "http://primary.invalid",
                "http://fallback.invalid",
                "http://primary.invalid",
                "http://fallback.invalid",
                "http://primary.invalid",
            ]
        );

        // Exhaustion rotates once, so the next call starts on the fallback.
        pool.rotate();
        assert_eq!(pool.url_for_attempt(0), "http://fallback.invalid");
    }

    #[test]
    fn test_healthy_endpoint_becomes_the_new_start() {
        let pool = EndpointPool::new(&[
            "http://primary.invalid".to_string(),
            "http://fallback-a.invalid".to_string(),
            "http://fallback-b.invalid".to_string(),
        ])
        .unwrap();

        // Attempt 2 answered, so later calls begin there.
        pool.mark_healthy(2);
        assert_eq!(pool.url_for_attempt(0), "http://fallback-b.invalid");

        // Attempt 0 succeeding leaves the cursor alone.
        pool.mark_healthy(0);
        assert_eq!(pool.url_for_attempt(0), "http://fallback-b.invalid");
    }

    #[test]
    fn test_bad_urls_are_skipped() {
        let pool = EndpointPool::new(&[
            "not a url".to_string(),
            "http://ok.invalid".to_string(),
        ])
        .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let err = EndpointPool::new(&[]).unwrap_err();
        assert!(matches!(err, ChainError::InvalidEndpoint { .. }));
    }
}
