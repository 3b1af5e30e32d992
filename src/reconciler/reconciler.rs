//! Log reconciliation: deployments, kicks, takes, and the transfer-log
//! purchase fallback.
//!
//! Every handler is idempotent (domain writes upsert or insert with
//! conflict keys) and pairs each domain change with exactly one outbox
//! row in the same transaction. Handlers never partially fail a batch
//! for per-field problems; only transient errors (RPC, database) bubble
//! up so the scanner can retry the whole range.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use tracing::{info, warn};

use crate::cache::BoundedCache;
use crate::chain::contracts::{
    AuctionKicked, AuctionTaken, DeployedNewAuctionV0, DeployedNewAuctionV1, IERC20, Transfer,
};
use crate::chain::{ChainClient, VersionedAuction, address_string, hash_string};
use crate::config::FactoryConfig;
use crate::domain::{
    Auction, DomainEvent, Round, SENTINEL_ROUND_ID, SourceLog, Take, Token, resolve_round,
    seconds_from_round_start, take_price,
};
use crate::error::IndexerError;
use crate::outbox::OutboxWriter;
use crate::persistence::{AuctionStore, TrackedAuction};

/// Rounds considered when matching a take to its round.
const ROUND_RESOLUTION_LIMIT: i64 = 64;

/// A purchase, from either detection path, before round resolution.
#[derive(Debug)]
struct Purchase {
    auction_address: String,
    taker: String,
    from_token: String,
    want_token: String,
    amount_taken: U256,
    amount_paid: U256,
    source: SourceLog,
}

/// Per-network reconciler.
///
/// Owns the token-metadata cache (bounded FIFO) and the database/chain
/// handles the handlers need. Shared by all factory scanners of one
/// network.
#[derive(Debug)]
pub struct Reconciler {
    client: Arc<ChainClient>,
    store: AuctionStore,
    chain_id: i64,
    tokens: Mutex<BoundedCache<String, Token>>,
}

impl Reconciler {
    /// Creates a reconciler for one network.
    #[must_use]
    pub fn new(
        client: Arc<ChainClient>,
        store: AuctionStore,
        chain_id: i64,
        token_cache_capacity: usize,
    ) -> Self {
        Self {
            client,
            store,
            chain_id,
            tokens: Mutex::new(BoundedCache::new(token_cache_capacity)),
        }
    }

    /// Reconciles a factory deployment log: fetches parameters, discovers
    /// the want token, upserts the auction and writes the `deploy` outbox
    /// event in one transaction.
    ///
    /// Returns the tracked-auction projection for the scanner's watch
    /// set, or `None` if the log does not decode as a deployment of the
    /// factory's generation.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on RPC or database failure; the scanner
    /// retries the batch.
    pub async fn handle_deployment(
        &self,
        factory: &FactoryConfig,
        log: &Log,
    ) -> Result<Option<TrackedAuction>, IndexerError> {
        let version = factory.version;

        // The two factory generations emit different deployment events.
        let (auction, deployer, event_want) = if version.want_token_in_event() {
            match DeployedNewAuctionV0::decode_log(&log.inner) {
                Ok(decoded) => (
                    decoded.data.auction,
                    decoded.data.deployer,
                    Some(decoded.data.want),
                ),
                Err(e) => {
                    warn!(chain_id = self.chain_id, error = %e, "undecodable deployment log");
                    return Ok(None);
                }
            }
        } else {
            match DeployedNewAuctionV1::decode_log(&log.inner) {
                Ok(decoded) => (decoded.data.auction, decoded.data.deployer, None),
                Err(e) => {
                    warn!(chain_id = self.chain_id, error = %e, "undecodable deployment log");
                    return Ok(None);
                }
            }
        };

        let source = self.source_log(log).await?;
        let versioned = VersionedAuction::new(version, auction, self.client.provider());

        let want = match event_want {
            Some(want) => want,
            None => versioned.want_token().await?,
        };
        let params = versioned.params_with_defaults().await;

        self.discover_token(want).await?;

        let record = Auction {
            address: address_string(auction),
            chain_id: self.chain_id,
            factory_address: address_string(factory.address),
            deployer: address_string(deployer),
            want_token: address_string(want),
            step_decay_rate: params.step_decay_rate.to_string(),
            starting_price: params.starting_price.to_string(),
            step_duration: i64::try_from(params.step_duration).unwrap_or(i64::MAX),
            round_length: i64::try_from(params.round_length).unwrap_or(i64::MAX),
            version,
            deployed_at: source.timestamp,
        };

        let event = DomainEvent::AuctionDeployed {
            auction_address: record.address.clone(),
            want_token: record.want_token.clone(),
            deployer: record.deployer.clone(),
            version,
        };

        let mut tx = self.store.pool().begin().await?;
        self.store.upsert_auction(&mut tx, &record).await?;
        OutboxWriter::append(&mut tx, &source, &event).await?;
        tx.commit().await?;

        info!(
            chain_id = self.chain_id,
            auction = %record.address,
            want = %record.want_token,
            version = %version,
            block = source.block_number,
            "auction deployed"
        );

        Ok(Some(TrackedAuction {
            address: record.address,
            version,
            want_token: record.want_token,
        }))
    }

    /// Reconciles a round start: allocates `max(round_id) + 1`,
    /// deactivates the previous active round, inserts the new round and
    /// writes the `kick` outbox event in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on RPC or database failure.
    pub async fn handle_kick(&self, log: &Log) -> Result<(), IndexerError> {
        let decoded = match AuctionKicked::decode_log(&log.inner) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(chain_id = self.chain_id, error = %e, "undecodable kick log");
                return Ok(());
            }
        };

        let auction_address = address_string(log.address());
        let from_token = address_string(decoded.data.from);
        let available = decoded.data.available;
        let source = self.source_log(log).await?;

        self.discover_token(decoded.data.from).await?;

        let mut tx = self.store.pool().begin().await?;

        // Replayed kick (crash recovery re-processes the in-flight
        // batch): the round already exists, nothing to do.
        if self
            .store
            .round_exists_for_kick(&mut tx, self.chain_id, &source.tx_hash, source.log_index)
            .await?
        {
            tx.rollback().await?;
            return Ok(());
        }

        let round_id = self
            .store
            .next_round_id(&mut tx, &auction_address, self.chain_id)
            .await?;
        let deactivated = self
            .store
            .deactivate_rounds(&mut tx, &auction_address, self.chain_id)
            .await?;

        let round = Round {
            auction_address: auction_address.clone(),
            chain_id: self.chain_id,
            round_id,
            from_token: from_token.clone(),
            initial_available: available.to_string(),
            available_amount: available.to_string(),
            total_takes: 0,
            total_volume_sold: "0".to_string(),
            kicked_at: source.timestamp,
            is_active: true,
            kick_tx_hash: source.tx_hash.clone(),
            kick_log_index: source.log_index,
        };
        if !self.store.insert_round(&mut tx, &round).await? {
            // Lost a race with another reconciliation of the same kick;
            // roll back so the deactivation above is undone as well.
            tx.rollback().await?;
            return Ok(());
        }

        let event = DomainEvent::RoundKicked {
            auction_address: auction_address.clone(),
            round_id,
            from_token: from_token.clone(),
            initial_available: available.to_string(),
        };
        OutboxWriter::append(&mut tx, &source, &event).await?;
        self.store
            .enqueue_price_request(&mut tx, self.chain_id, source.block_number, &from_token)
            .await?;
        tx.commit().await?;

        info!(
            chain_id = self.chain_id,
            auction = %auction_address,
            round_id,
            deactivated,
            available = %available,
            block = source.block_number,
            "round kicked"
        );
        Ok(())
    }

    /// Reconciles a dedicated take event.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on RPC or database failure.
    pub async fn handle_take(
        &self,
        tracked: &TrackedAuction,
        log: &Log,
    ) -> Result<(), IndexerError> {
        let decoded = match AuctionTaken::decode_log(&log.inner) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(chain_id = self.chain_id, error = %e, "undecodable take log");
                return Ok(());
            }
        };

        let source = self.source_log(log).await?;
        let purchase = Purchase {
            auction_address: address_string(log.address()),
            taker: address_string(decoded.data.taker),
            from_token: address_string(decoded.data.from),
            want_token: tracked.want_token.clone(),
            amount_taken: decoded.data.amountTaken,
            amount_paid: decoded.data.amountPaid,
            source,
        };
        self.record_purchase(purchase).await
    }

    /// Purchase fallback for contracts without a reliable take event:
    /// reconstructs the purchase from an ERC-20 transfer out of the
    /// auction. Converges with the event path on `(tx_hash, auction)`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on RPC or database failure.
    pub async fn handle_transfer(
        &self,
        tracked: &TrackedAuction,
        log: &Log,
    ) -> Result<(), IndexerError> {
        let decoded = match Transfer::decode_log(&log.inner) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(chain_id = self.chain_id, error = %e, "undecodable transfer log");
                return Ok(());
            }
        };
        if decoded.data.value.is_zero() {
            return Ok(());
        }

        let source = self.source_log(log).await?;

        // A genuine take event in the same transaction already produced
        // this purchase; the synthetic record would only duplicate it.
        if self
            .store
            .take_exists_for_tx(self.chain_id, &source.tx_hash, &tracked.address)
            .await?
        {
            return Ok(());
        }

        // Token being sold is the contract that emitted the transfer.
        let token = self.discover_token(log.address()).await?;
        tracing::debug!(
            chain_id = self.chain_id,
            auction = %tracked.address,
            token = %token.address,
            decimals = token.decimals_or_default(),
            "synthetic take from transfer log"
        );

        let purchase = Purchase {
            auction_address: tracked.address.clone(),
            taker: address_string(decoded.data.to),
            from_token: token.address,
            want_token: tracked.want_token.clone(),
            amount_taken: decoded.data.value,
            // The payment leg is not visible in a transfer log.
            amount_paid: U256::ZERO,
            source,
        };
        self.record_purchase(purchase).await
    }

    /// Shared take path: resolves the round, allocates the sequence
    /// number, inserts the take with its outbox event, then best-effort
    /// updates the round aggregates.
    async fn record_purchase(&self, purchase: Purchase) -> Result<(), IndexerError> {
        let rounds = self
            .store
            .recent_rounds(&purchase.auction_address, self.chain_id, ROUND_RESOLUTION_LIMIT)
            .await?;

        let (round_id, total_takes, seconds) = match resolve_round(&rounds, &purchase.from_token) {
            Some(round) => {
                let (seconds, clamped) =
                    seconds_from_round_start(purchase.source.timestamp, round.kicked_at);
                if clamped {
                    warn!(
                        chain_id = self.chain_id,
                        auction = %purchase.auction_address,
                        round_id = round.round_id,
                        tx_hash = %purchase.source.tx_hash,
                        "take timestamp precedes round kick, clamping to zero"
                    );
                }
                (round.round_id, round.total_takes, seconds)
            }
            None => {
                warn!(
                    chain_id = self.chain_id,
                    auction = %purchase.auction_address,
                    tx_hash = %purchase.source.tx_hash,
                    "no round found for take, recording against sentinel round 0"
                );
                (SENTINEL_ROUND_ID, 0, 0)
            }
        };

        let price = take_price(purchase.amount_taken, purchase.amount_paid);

        let mut tx = self.store.pool().begin().await?;
        let take_seq = self
            .store
            .next_take_seq(
                &mut tx,
                &purchase.auction_address,
                self.chain_id,
                round_id,
                total_takes,
            )
            .await?;

        let take = Take {
            auction_address: purchase.auction_address.clone(),
            chain_id: self.chain_id,
            round_id,
            take_seq,
            taker: purchase.taker.clone(),
            from_token: purchase.from_token.clone(),
            want_token: purchase.want_token.clone(),
            amount_taken: purchase.amount_taken.to_string(),
            amount_paid: purchase.amount_paid.to_string(),
            price: price.to_string(),
            seconds_from_round_start: seconds,
            block_number: purchase.source.block_number,
            tx_hash: purchase.source.tx_hash.clone(),
            log_index: purchase.source.log_index,
        };

        let inserted = self.store.insert_take(&mut tx, &take).await?;
        if inserted {
            let event = DomainEvent::TakeRecorded {
                auction_address: take.auction_address.clone(),
                round_id,
                take_seq,
                taker: take.taker.clone(),
                from_token: take.from_token.clone(),
                want_token: take.want_token.clone(),
                amount_taken: take.amount_taken.clone(),
                amount_paid: take.amount_paid.clone(),
                price: take.price.clone(),
            };
            OutboxWriter::append(&mut tx, &purchase.source, &event).await?;
            self.store
                .enqueue_price_request(
                    &mut tx,
                    self.chain_id,
                    take.block_number,
                    &take.from_token,
                )
                .await?;
            self.store
                .enqueue_price_request(
                    &mut tx,
                    self.chain_id,
                    take.block_number,
                    &take.want_token,
                )
                .await?;
        }
        tx.commit().await?;

        if !inserted {
            return Ok(());
        }

        info!(
            chain_id = self.chain_id,
            auction = %take.auction_address,
            round_id,
            take_seq,
            amount_taken = %take.amount_taken,
            block = take.block_number,
            "take recorded"
        );

        // The take row is committed; an aggregate failure must not undo
        // it. Logged with replay coordinates instead.
        if round_id != SENTINEL_ROUND_ID
            && let Err(e) = self
                .store
                .apply_take_aggregates(
                    &take.auction_address,
                    self.chain_id,
                    round_id,
                    &take.amount_taken,
                )
                .await
        {
            tracing::error!(
                chain_id = self.chain_id,
                auction = %take.auction_address,
                round_id,
                tx_hash = %take.tx_hash,
                block = take.block_number,
                error = %e,
                "round aggregate update failed"
            );
        }

        Ok(())
    }

    /// Token metadata: cache → database → on-chain calls, upserting
    /// whatever subset of `symbol`/`name`/`decimals` could be read.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure. On-chain
    /// metadata call failures only leave fields unset.
    pub async fn discover_token(&self, address: Address) -> Result<Token, IndexerError> {
        let key = address_string(address);

        if let Ok(cache) = self.tokens.lock()
            && let Some(token) = cache.get(&key)
        {
            return Ok(token.clone());
        }

        if let Some(token) = self.store.token(&key, self.chain_id).await? {
            if let Ok(mut cache) = self.tokens.lock() {
                cache.insert(key, token.clone());
            }
            return Ok(token);
        }

        let erc20 = IERC20::new(address, self.client.provider());
        let symbol = erc20.symbol().call().await.ok();
        let name = erc20.name().call().await.ok();
        let decimals = erc20.decimals().call().await.ok().map(i32::from);

        let token = Token {
            address: key.clone(),
            chain_id: self.chain_id,
            symbol,
            name,
            decimals,
        };
        self.store.upsert_token(&token).await?;
        if let Ok(mut cache) = self.tokens.lock() {
            cache.insert(key, token.clone());
        }

        info!(
            chain_id = self.chain_id,
            token = %token.address,
            symbol = token.symbol.as_deref().unwrap_or("?"),
            decimals = token.decimals_or_default(),
            "token discovered"
        );
        Ok(token)
    }

    /// Builds the [`SourceLog`] for a raw log, resolving the block
    /// timestamp through the bounded cache.
    async fn source_log(&self, log: &Log) -> Result<SourceLog, IndexerError> {
        let block_number = log.block_number.unwrap_or(0);
        let timestamp = self.client.block_timestamp(block_number).await?;
        Ok(SourceLog::new(
            self.chain_id,
            i64::try_from(block_number).unwrap_or(0),
            &hash_string(log.transaction_hash.unwrap_or(B256::ZERO)),
            i64::try_from(log.log_index.unwrap_or(0)).unwrap_or(0),
            timestamp,
        ))
    }
}
