//! Thin RPC client wrapper with per-call timeouts.
//!
//! Wraps an alloy HTTP provider behind a uniform [`IndexerError`] surface
//! so callers never deal with transport error types directly. A bounded
//! FIFO cache keeps block timestamps, which the reconciler asks for
//! repeatedly within a batch.

use std::sync::Mutex;
use std::time::Duration;

use alloy::consensus::BlockHeader;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::reqwest::Url;
use chrono::{DateTime, Utc};

use crate::cache::BoundedCache;
use crate::error::IndexerError;

/// RPC client for one network.
#[derive(Debug)]
pub struct ChainClient {
    provider: DynProvider,
    chain_id: u64,
    call_timeout: Duration,
    block_timestamps: Mutex<BoundedCache<u64, DateTime<Utc>>>,
}

impl ChainClient {
    /// Connects an HTTP provider for `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] if the URL cannot be parsed.
    pub fn connect(
        rpc_url: &str,
        chain_id: u64,
        call_timeout: Duration,
        timestamp_cache_capacity: usize,
    ) -> Result<Self, IndexerError> {
        let url: Url = rpc_url
            .parse()
            .map_err(|_| IndexerError::Config(format!("invalid rpc url: {rpc_url}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        Ok(Self {
            provider,
            chain_id,
            call_timeout,
            block_timestamps: Mutex::new(BoundedCache::new(timestamp_cache_capacity)),
        })
    }

    /// Chain id this client talks to.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Returns the underlying provider, for contract call bindings.
    #[must_use]
    pub fn provider(&self) -> DynProvider {
        self.provider.clone()
    }

    /// Current chain head.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Rpc`] on provider failure or timeout.
    pub async fn block_number(&self) -> Result<u64, IndexerError> {
        self.with_timeout(self.provider.get_block_number()).await
    }

    /// Fetches logs matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Rpc`] on provider failure or timeout. The
    /// message is preserved so [`IndexerError::is_range_error`] can steer
    /// range bisection.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, IndexerError> {
        self.with_timeout(self.provider.get_logs(filter)).await
    }

    /// Timestamp of the given block, served from the bounded cache when
    /// possible.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Rpc`] if the block cannot be fetched, or
    /// [`IndexerError::Decode`] if its timestamp is out of range.
    pub async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, IndexerError> {
        if let Ok(cache) = self.block_timestamps.lock()
            && let Some(ts) = cache.get(&block_number)
        {
            return Ok(*ts);
        }

        let block = self
            .with_timeout(self.provider.get_block_by_number(block_number.into()))
            .await?
            .ok_or_else(|| IndexerError::Rpc(format!("block {block_number} not found")))?;

        let raw = block.header.timestamp();
        let timestamp = DateTime::from_timestamp(i64::try_from(raw).unwrap_or(0), 0)
            .ok_or_else(|| {
                IndexerError::Decode(format!("block {block_number} timestamp {raw} out of range"))
            })?;

        if let Ok(mut cache) = self.block_timestamps.lock() {
            cache.insert(block_number, timestamp);
        }
        Ok(timestamp)
    }

    /// Runs an RPC call under the configured call timeout, folding both
    /// timeout and transport failures into [`IndexerError::Rpc`].
    async fn with_timeout<T, E: std::fmt::Display>(
        &self,
        fut: impl IntoFuture<Output = Result<T, E>>,
    ) -> Result<T, IndexerError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(IndexerError::rpc),
            Err(_) => Err(IndexerError::Rpc(format!(
                "request timed out after {:?}",
                self.call_timeout
            ))),
        }
    }
}
