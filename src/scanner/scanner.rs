//! Incremental per-factory chain scanning with adaptive range bisection.
//!
//! Each network runs one [`NetworkScanner`] task; within it, factories
//! are scanned sequentially to bound RPC load. A batch is processed as
//! an explicit worklist of ranges: when the provider rejects a range for
//! size/timeout reasons the range is bisected in place, any other error
//! aborts the pass and the identical batch is retried after a fixed
//! backoff. The cursor advances only after the entire batch (including
//! splits) has reconciled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::chain::contracts::{
    AuctionKicked, AuctionTaken, DeployedNewAuctionV0, DeployedNewAuctionV1, Transfer,
};
use crate::chain::{ChainClient, address_string};
use crate::config::FactoryConfig;
use crate::error::IndexerError;
use crate::persistence::{AuctionStore, TrackedAuction};
use crate::reconciler::Reconciler;
use crate::scanner::CursorStore;

/// Auction addresses per transfer-fallback topic filter.
const TRANSFER_FILTER_CHUNK: usize = 20;

/// Splits an inclusive range into two halves for bisection.
/// Requires `lo < hi`.
const fn split_range(lo: u64, hi: u64) -> ((u64, u64), (u64, u64)) {
    let mid = lo + (hi - lo) / 2;
    ((lo, mid), (mid + 1, hi))
}

/// Sorts logs into chain order before reconciliation.
fn sort_logs(logs: &mut [Log]) {
    logs.sort_by_key(|log| (log.block_number.unwrap_or(0), log.log_index.unwrap_or(0)));
}

/// Scans one factory on one network.
#[derive(Debug)]
pub struct FactoryScanner {
    client: Arc<ChainClient>,
    store: AuctionStore,
    cursors: CursorStore,
    reconciler: Arc<Reconciler>,
    network: String,
    chain_id: i64,
    factory: FactoryConfig,
    batch_size: u64,
    min_bisect_span: u64,
    /// Auctions watched for kick/take/transfer logs, keyed by canonical
    /// address. Grown within a run as deployments are discovered.
    tracked: HashMap<String, TrackedAuction>,
}

impl FactoryScanner {
    /// Creates a scanner for `factory` on the given network.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ChainClient>,
        store: AuctionStore,
        cursors: CursorStore,
        reconciler: Arc<Reconciler>,
        network: String,
        chain_id: i64,
        factory: FactoryConfig,
        batch_size: u64,
        min_bisect_span: u64,
    ) -> Self {
        Self {
            client,
            store,
            cursors,
            reconciler,
            network,
            chain_id,
            factory,
            batch_size,
            min_bisect_span,
            tracked: HashMap::new(),
        }
    }

    /// Seeds the tracked-auction set from previously reconciled
    /// deployments, so restarts resume watching known instances.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn seed_tracked(&mut self) -> Result<(), IndexerError> {
        let factory_address = address_string(self.factory.address);
        let auctions = self
            .store
            .tracked_auctions(self.chain_id, &factory_address)
            .await?;
        let count = auctions.len();
        self.tracked = auctions
            .into_iter()
            .map(|a| (a.address.clone(), a))
            .collect();
        info!(
            network = %self.network,
            factory = %self.factory.address,
            tracked = count,
            "tracked auction set seeded"
        );
        Ok(())
    }

    /// One scan pass: cursor → chain head, processed in fixed-size
    /// batches. The cursor is advanced after each fully reconciled batch
    /// and left untouched when cancellation interrupts one.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on RPC or database failure; the caller
    /// retries the identical batch after a fixed backoff.
    pub async fn scan_pass(&mut self, cancel: &CancellationToken) -> Result<(), IndexerError> {
        let factory_address = address_string(self.factory.address);
        let start_block = i64::try_from(self.factory.start_block).unwrap_or(0);
        let last = self
            .cursors
            .get(self.chain_id, &factory_address, start_block)
            .await?;

        let head = self.client.block_number().await?;
        let target = i64::try_from(head).unwrap_or(0);
        if last >= target {
            trace!(
                network = %self.network,
                factory = %factory_address,
                last_indexed_block = last,
                "cursor at chain head"
            );
            return Ok(());
        }

        let batch = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        let mut from = last.saturating_add(1);
        while from <= target {
            let to = from.saturating_add(batch).saturating_sub(1).min(target);
            let completed = self
                .process_batch(u64::try_from(from).unwrap_or(0), u64::try_from(to).unwrap_or(0), cancel)
                .await?;
            if !completed {
                // Cancelled mid-batch; the cursor stays put so the batch
                // replays in full on the next start.
                return Ok(());
            }
            self.cursors
                .advance(self.chain_id, &factory_address, to)
                .await?;
            debug!(
                network = %self.network,
                factory = %factory_address,
                from_block = from,
                to_block = to,
                "batch reconciled"
            );
            from = to.saturating_add(1);
        }
        Ok(())
    }

    /// Processes `[from, to]` through an explicit worklist, bisecting on
    /// transient range errors. Returns `false` when cancellation stopped
    /// the batch before every sub-range reconciled.
    async fn process_batch(
        &mut self,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> Result<bool, IndexerError> {
        let mut worklist = VecDeque::from([(from, to)]);

        while let Some((lo, hi)) = worklist.pop_front() {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            match self.process_range(lo, hi).await {
                Ok(()) => {}
                Err(e) if e.is_range_error() && hi - lo > self.min_bisect_span => {
                    let (left, right) = split_range(lo, hi);
                    warn!(
                        network = %self.network,
                        factory = %self.factory.address,
                        from_block = lo,
                        to_block = hi,
                        error = %e,
                        "provider rejected range, bisecting"
                    );
                    worklist.push_front(right);
                    worklist.push_front(left);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Fetches and reconciles all log groups for one range: factory
    /// deployments first (growing the tracked set), then auction
    /// kick/take logs, then the transfer fallback for legacy auctions.
    async fn process_range(&mut self, from: u64, to: u64) -> Result<(), IndexerError> {
        self.process_deployments(from, to).await?;
        self.process_auction_logs(from, to).await?;
        self.process_transfer_fallback(from, to).await?;
        Ok(())
    }

    async fn process_deployments(&mut self, from: u64, to: u64) -> Result<(), IndexerError> {
        let signature = if self.factory.version.want_token_in_event() {
            DeployedNewAuctionV0::SIGNATURE_HASH
        } else {
            DeployedNewAuctionV1::SIGNATURE_HASH
        };
        let filter = Filter::new()
            .address(self.factory.address)
            .event_signature(signature)
            .from_block(from)
            .to_block(to);

        let mut logs = self.client.get_logs(&filter).await?;
        sort_logs(&mut logs);

        for log in &logs {
            if let Some(tracked) = self.reconciler.handle_deployment(&self.factory, log).await? {
                self.tracked.insert(tracked.address.clone(), tracked);
            }
        }
        Ok(())
    }

    async fn process_auction_logs(&mut self, from: u64, to: u64) -> Result<(), IndexerError> {
        let addresses = self.tracked_addresses(|_| true);
        if addresses.is_empty() {
            return Ok(());
        }

        let filter = Filter::new()
            .address(addresses)
            .event_signature(vec![
                AuctionKicked::SIGNATURE_HASH,
                AuctionTaken::SIGNATURE_HASH,
            ])
            .from_block(from)
            .to_block(to);

        let mut logs = self.client.get_logs(&filter).await?;
        sort_logs(&mut logs);

        for log in &logs {
            match log.topic0() {
                Some(topic) if *topic == AuctionKicked::SIGNATURE_HASH => {
                    self.reconciler.handle_kick(log).await?;
                }
                Some(topic) if *topic == AuctionTaken::SIGNATURE_HASH => {
                    let key = address_string(log.address());
                    match self.tracked.get(&key) {
                        Some(tracked) => {
                            let tracked = tracked.clone();
                            self.reconciler.handle_take(&tracked, log).await?;
                        }
                        None => warn!(
                            network = %self.network,
                            auction = %key,
                            "take log from untracked auction, skipping"
                        ),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Transfer-log fallback for contracts without a reliable take
    /// event: ERC-20 transfers whose sender is a tracked legacy auction,
    /// fetched in per-address-group topic filters.
    async fn process_transfer_fallback(&mut self, from: u64, to: u64) -> Result<(), IndexerError> {
        let legacy = self.tracked_addresses(|a| !a.version.has_reliable_take_event());
        if legacy.is_empty() {
            return Ok(());
        }

        for chunk in legacy.chunks(TRANSFER_FILTER_CHUNK) {
            let senders: Vec<B256> = chunk.iter().map(|a| a.into_word()).collect();
            let filter = Filter::new()
                .event_signature(Transfer::SIGNATURE_HASH)
                .topic1(senders)
                .from_block(from)
                .to_block(to);

            let mut logs = self.client.get_logs(&filter).await?;
            sort_logs(&mut logs);

            for log in &logs {
                let Some(sender_topic) = log.topics().get(1).copied() else {
                    continue;
                };
                let key = address_string(Address::from_word(sender_topic));
                let Some(tracked) = self.tracked.get(&key).cloned() else {
                    continue;
                };
                self.reconciler.handle_transfer(&tracked, log).await?;
            }
        }
        Ok(())
    }

    /// Tracked auction addresses matching `keep`, parsed for filters.
    fn tracked_addresses(&self, keep: impl Fn(&TrackedAuction) -> bool) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .tracked
            .values()
            .filter(|a| keep(a))
            .filter_map(|a| match a.address.parse::<Address>() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    warn!(address = %a.address, "unparseable tracked address");
                    None
                }
            })
            .collect();
        addresses.sort_unstable();
        addresses
    }
}

/// Scan loop for one network: factories sequentially, then sleep until
/// the next poll.
#[derive(Debug)]
pub struct NetworkScanner {
    name: String,
    poll_interval: Duration,
    retry_backoff: Duration,
    factories: Vec<FactoryScanner>,
}

impl NetworkScanner {
    /// Creates the scan loop for a network.
    #[must_use]
    pub fn new(
        name: String,
        poll_interval: Duration,
        retry_backoff: Duration,
        factories: Vec<FactoryScanner>,
    ) -> Self {
        Self {
            name,
            poll_interval,
            retry_backoff,
            factories,
        }
    }

    /// Runs until `cancel` fires. A failed batch is logged and the
    /// identical batch retried after the fixed backoff, without
    /// advancing the cursor.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(network = %self.name, factories = self.factories.len(), "network scanner started");

        for factory in &mut self.factories {
            if let Err(e) = factory.seed_tracked().await {
                warn!(network = %self.name, error = %e, "could not seed tracked set, starting empty");
            }
        }

        loop {
            for factory in &mut self.factories {
                if cancel.is_cancelled() {
                    info!(network = %self.name, "network scanner stopped");
                    return;
                }
                loop {
                    match factory.scan_pass(&cancel).await {
                        Ok(()) => break,
                        Err(e) => {
                            error!(
                                network = %self.name,
                                factory = %factory.factory.address,
                                chain_id = factory.chain_id,
                                error = %e,
                                "scan pass failed, retrying batch after backoff"
                            );
                            tokio::select! {
                                () = cancel.cancelled() => {
                                    info!(network = %self.name, "network scanner stopped");
                                    return;
                                }
                                () = tokio::time::sleep(self.retry_backoff) => {}
                            }
                        }
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(network = %self.name, "network scanner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_range_without_overlap() {
        let ((lo1, hi1), (lo2, hi2)) = split_range(100, 200);
        assert_eq!(lo1, 100);
        assert_eq!(hi2, 200);
        assert_eq!(lo2, hi1 + 1);
    }

    #[test]
    fn split_of_two_blocks() {
        let ((lo1, hi1), (lo2, hi2)) = split_range(5, 6);
        assert_eq!((lo1, hi1), (5, 5));
        assert_eq!((lo2, hi2), (6, 6));
    }

    #[test]
    fn repeated_splits_terminate_at_single_blocks() {
        let mut worklist = VecDeque::from([(0_u64, 1023_u64)]);
        let mut singles = 0_u64;
        while let Some((lo, hi)) = worklist.pop_front() {
            if lo == hi {
                singles += 1;
                continue;
            }
            let (left, right) = split_range(lo, hi);
            worklist.push_back(left);
            worklist.push_back(right);
        }
        assert_eq!(singles, 1024);
    }

    #[test]
    fn sort_orders_by_block_then_log_index() {
        let mut logs: Vec<Log> = Vec::new();
        let mut mk = |block: u64, index: u64| {
            let mut log = Log::default();
            log.block_number = Some(block);
            log.log_index = Some(index);
            logs.push(log);
        };
        mk(10, 2);
        mk(9, 5);
        mk(10, 0);

        sort_logs(&mut logs);
        let order: Vec<(Option<u64>, Option<u64>)> =
            logs.iter().map(|l| (l.block_number, l.log_index)).collect();
        assert_eq!(
            order,
            vec![(Some(9), Some(5)), (Some(10), Some(0)), (Some(10), Some(2))]
        );
    }
}
