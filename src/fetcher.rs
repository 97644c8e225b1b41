//! # Log Fetcher
//!
//! Pulls logs for one contract over an inclusive block range.
//!
//! Ranges are split into windows of at most `max_block_span` blocks, every window is retried
//! with exponential backoff, and an optional QPS limiter guards the node. Logs come back in
//! whatever order the node returns them.

use crate::error::{IndexerError, Result};
use crate::settings::Rpc;
use crate::types::RawLog;
use crate::utils::create_block_chunks;
use async_trait::async_trait;
use ethers::prelude::{Http, Middleware, Provider};
use ethers::types::{Address, Filter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Anything that can answer `eth_blockNumber` and `eth_getLogs`.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    /// Logs emitted by `address` in `[from_block, to_block]`, in no particular order.
    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64) -> Result<Vec<RawLog>>;
}

pub struct RpcLogFetcher {
    provider: Arc<Provider<Http>>,
    max_block_span: u64,
    retry_attempts: usize,
    retry_base_delay_ms: u64,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl RpcLogFetcher {
    pub fn new(settings: &Rpc) -> Result<Self> {
        let provider = Provider::<Http>::try_from(settings.url.as_str()).map_err(|e| {
            IndexerError::config(format!("RPC_URL '{}' is not usable: {e}", settings.url))
        })?;

        let limiter = match settings.qps_limit {
            Some(qps) => {
                let qps = NonZeroU32::new(qps)
                    .ok_or_else(|| IndexerError::config("rpc.qps_limit must be non-zero"))?;
                Some(Arc::new(RateLimiter::direct(Quota::per_second(qps))))
            }
            None => None,
        };

        Ok(Self {
            provider: Arc::new(provider),
            max_block_span: settings.max_block_span,
            retry_attempts: settings.retry_attempts,
            retry_base_delay_ms: settings.retry_base_delay_ms,
            limiter,
        })
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.retry_base_delay_ms / 2).max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.retry_attempts)
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn fetch_window(&self, address: Address, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let filter = Filter::new().address(address).from_block(from).to_block(to);

        let logs = Retry::start(self.backoff(), || async {
            self.throttle().await;
            self.provider.get_logs(&filter).await.map_err(|e| {
                warn!("eth_getLogs {:?} [{}, {}] failed: {}", address, from, to, e);
                e
            })
        })
        .await
        .map_err(|e| IndexerError::Rpc(format!("eth_getLogs [{from}, {to}] for {address:?}: {e}")))?;

        logs.into_iter().map(RawLog::try_from).collect()
    }
}

#[async_trait]
impl LogSource for RpcLogFetcher {
    async fn latest_block(&self) -> Result<u64> {
        let block = Retry::start(self.backoff(), || async {
            self.throttle().await;
            self.provider.get_block_number().await
        })
        .await
        .map_err(|e| IndexerError::Rpc(format!("eth_blockNumber: {e}")))?;
        Ok(block.as_u64())
    }

    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
        let mut logs = Vec::new();
        for (from, to) in create_block_chunks(from_block, to_block, self.max_block_span) {
            let window = self.fetch_window(address, from, to).await?;
            debug!(
                "Fetched {} logs for {:?} in [{}, {}]",
                window.len(),
                address,
                from,
                to
            );
            logs.extend(window);
        }
        Ok(logs)
    }
}
