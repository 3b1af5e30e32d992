//! PostgreSQL implementation of the domain store.
//!
//! Every write is idempotent: auctions and tokens upsert on their
//! primary key, rounds and takes insert with `ON CONFLICT DO NOTHING`,
//! so replaying an already-processed block range leaves the tables
//! unchanged. Methods that must share one commit with the outbox write
//! take a `&mut PgConnection` from the caller's transaction.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::models::TrackedAuction;
use crate::domain::{Auction, AuctionVersion, Round, Take, Token};
use crate::error::IndexerError;

/// PostgreSQL-backed domain store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct AuctionStore {
    pool: PgPool,
}

impl AuctionStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool, for callers that open transactions.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upserts an auction row (`ON CONFLICT` update-in-place), inside the
    /// caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn upsert_auction(
        &self,
        conn: &mut PgConnection,
        auction: &Auction,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO auctions (address, chain_id, factory_address, deployer, want_token, \
             step_decay_rate, starting_price, step_duration, round_length, version, deployed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (address, chain_id) DO UPDATE SET \
             factory_address = EXCLUDED.factory_address, \
             deployer = EXCLUDED.deployer, \
             want_token = EXCLUDED.want_token, \
             step_decay_rate = EXCLUDED.step_decay_rate, \
             starting_price = EXCLUDED.starting_price, \
             step_duration = EXCLUDED.step_duration, \
             round_length = EXCLUDED.round_length, \
             version = EXCLUDED.version, \
             deployed_at = EXCLUDED.deployed_at, \
             updated_at = now()",
        )
        .bind(&auction.address)
        .bind(auction.chain_id)
        .bind(&auction.factory_address)
        .bind(&auction.deployer)
        .bind(&auction.want_token)
        .bind(&auction.step_decay_rate)
        .bind(&auction.starting_price)
        .bind(auction.step_duration)
        .bind(auction.round_length)
        .bind(auction.version.as_str())
        .bind(auction.deployed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Loads the tracked-auction projection for one factory, used to seed
    /// the scanner's watch set on startup. Factories track only their own
    /// deployments, so scanners on the same chain never overlap.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure, or
    /// [`IndexerError::Decode`] if a stored version tag is unknown.
    pub async fn tracked_auctions(
        &self,
        chain_id: i64,
        factory_address: &str,
    ) -> Result<Vec<TrackedAuction>, IndexerError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT address, version, want_token FROM auctions \
             WHERE chain_id = $1 AND factory_address = $2",
        )
        .bind(chain_id)
        .bind(factory_address)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(address, version, want_token)| {
                Ok(TrackedAuction {
                    address,
                    version: version.parse::<AuctionVersion>()?,
                    want_token,
                })
            })
            .collect()
    }

    /// Allocates the next round id for an auction
    /// (`max(existing round_id) + 1`, so the first round is 1).
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn next_round_id(
        &self,
        conn: &mut PgConnection,
        auction_address: &str,
        chain_id: i64,
    ) -> Result<i64, IndexerError> {
        let next = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(round_id), 0) + 1 FROM rounds \
             WHERE auction_address = $1 AND chain_id = $2",
        )
        .bind(auction_address)
        .bind(chain_id)
        .fetch_one(conn)
        .await?;
        Ok(next)
    }

    /// Deactivates any currently-active round of the auction. Called
    /// before inserting a new round so at most one stays active.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn deactivate_rounds(
        &self,
        conn: &mut PgConnection,
        auction_address: &str,
        chain_id: i64,
    ) -> Result<u64, IndexerError> {
        let result = sqlx::query(
            "UPDATE rounds SET is_active = FALSE \
             WHERE auction_address = $1 AND chain_id = $2 AND is_active",
        )
        .bind(auction_address)
        .bind(chain_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Whether a round for this kick log already exists. Guards replayed
    /// kicks: without it, re-processing a kick would allocate a fresh
    /// `max + 1` round id instead of converging on the existing row.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn round_exists_for_kick(
        &self,
        conn: &mut PgConnection,
        chain_id: i64,
        kick_tx_hash: &str,
        kick_log_index: i64,
    ) -> Result<bool, IndexerError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM rounds \
             WHERE chain_id = $1 AND kick_tx_hash = $2 AND kick_log_index = $3",
        )
        .bind(chain_id)
        .bind(kick_tx_hash)
        .bind(kick_log_index)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    /// Inserts a round. Returns `false` when a round for the same kick
    /// log already exists (`ON CONFLICT DO NOTHING` on the kick-log key);
    /// the caller rolls back its transaction in that case so the
    /// deactivation of the previous round is undone too.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn insert_round(
        &self,
        conn: &mut PgConnection,
        round: &Round,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO rounds (auction_address, chain_id, round_id, from_token, \
             initial_available, available_amount, total_takes, total_volume_sold, \
             kicked_at, is_active, kick_tx_hash, kick_log_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (chain_id, kick_tx_hash, kick_log_index) DO NOTHING",
        )
        .bind(&round.auction_address)
        .bind(round.chain_id)
        .bind(round.round_id)
        .bind(&round.from_token)
        .bind(&round.initial_available)
        .bind(&round.available_amount)
        .bind(round.total_takes)
        .bind(&round.total_volume_sold)
        .bind(round.kicked_at)
        .bind(round.is_active)
        .bind(&round.kick_tx_hash)
        .bind(round.kick_log_index)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent rounds of an auction, newest kick first. The limit
    /// bounds the round-resolution scan for a take.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn recent_rounds(
        &self,
        auction_address: &str,
        chain_id: i64,
        limit: i64,
    ) -> Result<Vec<Round>, IndexerError> {
        let rows = sqlx::query_as::<
            _,
            (i64, String, String, String, i64, String, DateTime<Utc>, bool, String, i64),
        >(
            "SELECT round_id, from_token, initial_available, available_amount, total_takes, \
             total_volume_sold, kicked_at, is_active, kick_tx_hash, kick_log_index FROM rounds \
             WHERE auction_address = $1 AND chain_id = $2 \
             ORDER BY round_id DESC LIMIT $3",
        )
        .bind(auction_address)
        .bind(chain_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    round_id,
                    from_token,
                    initial_available,
                    available_amount,
                    total_takes,
                    total_volume_sold,
                    kicked_at,
                    is_active,
                    kick_tx_hash,
                    kick_log_index,
                )| Round {
                    auction_address: auction_address.to_string(),
                    chain_id,
                    round_id,
                    from_token,
                    initial_available,
                    available_amount,
                    total_takes,
                    total_volume_sold,
                    kicked_at,
                    is_active,
                    kick_tx_hash,
                    kick_log_index,
                },
            )
            .collect())
    }

    /// Allocates the next take sequence number within a round.
    ///
    /// Nominally `round.total_takes + 1`; the stored maximum is consulted
    /// as well so a previously failed (best-effort) aggregate update can
    /// never produce a duplicate sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn next_take_seq(
        &self,
        conn: &mut PgConnection,
        auction_address: &str,
        chain_id: i64,
        round_id: i64,
        round_total_takes: i64,
    ) -> Result<i64, IndexerError> {
        let next = sqlx::query_scalar::<_, i64>(
            "SELECT GREATEST($4, COALESCE(MAX(take_seq), 0)) + 1 FROM takes \
             WHERE auction_address = $1 AND chain_id = $2 AND round_id = $3",
        )
        .bind(auction_address)
        .bind(chain_id)
        .bind(round_id)
        .bind(round_total_takes)
        .fetch_one(conn)
        .await?;
        Ok(next)
    }

    /// Inserts a take. Returns `true` when the row was actually inserted;
    /// `false` means the source log was already processed (replay or the
    /// transfer fallback racing a genuine take event).
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn insert_take(
        &self,
        conn: &mut PgConnection,
        take: &Take,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO takes (auction_address, chain_id, round_id, take_seq, taker, \
             from_token, want_token, amount_taken, amount_paid, price, \
             seconds_from_round_start, block_number, tx_hash, log_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
        )
        .bind(&take.auction_address)
        .bind(take.chain_id)
        .bind(take.round_id)
        .bind(take.take_seq)
        .bind(&take.taker)
        .bind(&take.from_token)
        .bind(&take.want_token)
        .bind(&take.amount_taken)
        .bind(&take.amount_paid)
        .bind(&take.price)
        .bind(take.seconds_from_round_start)
        .bind(take.block_number)
        .bind(&take.tx_hash)
        .bind(take.log_index)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether any take is already recorded for the transaction against
    /// this auction. Used to keep the transfer fallback from duplicating
    /// a genuine take event in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn take_exists_for_tx(
        &self,
        chain_id: i64,
        tx_hash: &str,
        auction_address: &str,
    ) -> Result<bool, IndexerError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM takes \
             WHERE chain_id = $1 AND tx_hash = $2 AND auction_address = $3",
        )
        .bind(chain_id)
        .bind(tx_hash)
        .bind(auction_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Applies round aggregates after a take was inserted: bumps
    /// `total_takes`, subtracts the taken amount from `available_amount`
    /// (floored at zero) and adds it to `total_volume_sold`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure. Callers
    /// treat this as best-effort: the take row is already committed.
    pub async fn apply_take_aggregates(
        &self,
        auction_address: &str,
        chain_id: i64,
        round_id: i64,
        amount_taken: &str,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE rounds SET \
             total_takes = total_takes + 1, \
             available_amount = GREATEST(available_amount::numeric - $4::numeric, 0)::text, \
             total_volume_sold = (total_volume_sold::numeric + $4::numeric)::text \
             WHERE auction_address = $1 AND chain_id = $2 AND round_id = $3",
        )
        .bind(auction_address)
        .bind(chain_id)
        .bind(round_id)
        .bind(amount_taken)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads token metadata, if previously discovered.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn token(
        &self,
        address: &str,
        chain_id: i64,
    ) -> Result<Option<Token>, IndexerError> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>, Option<i32>)>(
            "SELECT symbol, name, decimals FROM tokens WHERE address = $1 AND chain_id = $2",
        )
        .bind(address)
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(symbol, name, decimals)| Token {
            address: address.to_string(),
            chain_id,
            symbol,
            name,
            decimals,
        }))
    }

    /// Upserts token metadata. Partial metadata overwrites nothing that
    /// is already known (`COALESCE` keeps existing values).
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn upsert_token(&self, token: &Token) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO tokens (address, chain_id, symbol, name, decimals) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (address, chain_id) DO UPDATE SET \
             symbol = COALESCE(EXCLUDED.symbol, tokens.symbol), \
             name = COALESCE(EXCLUDED.name, tokens.name), \
             decimals = COALESCE(EXCLUDED.decimals, tokens.decimals)",
        )
        .bind(&token.address)
        .bind(token.chain_id)
        .bind(&token.symbol)
        .bind(&token.name)
        .bind(token.decimals)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records that a `(chain, block, token)` pair needs a USD price,
    /// inside the caller's transaction so the guarantee survives batch
    /// replay. Consumed by external pricing workers; re-enqueueing is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn enqueue_price_request(
        &self,
        conn: &mut PgConnection,
        chain_id: i64,
        block_number: i64,
        token_address: &str,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO price_requests (chain_id, block_number, token_address, status) \
             VALUES ($1, $2, $3, 'pending') \
             ON CONFLICT (chain_id, block_number, token_address) DO NOTHING",
        )
        .bind(chain_id)
        .bind(block_number)
        .bind(token_address)
        .execute(conn)
        .await?;
        Ok(())
    }
}
