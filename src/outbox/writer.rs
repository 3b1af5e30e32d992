//! Outbox writer: one deduplicated event row per domain change.

use sqlx::PgConnection;

use crate::domain::event::normalize_tx_hash;
use crate::domain::{DomainEvent, EVENT_SCHEMA_VERSION, SourceLog};
use crate::error::IndexerError;

/// Appends outbox rows inside the caller's transaction.
///
/// The row shares its transaction with the domain write it describes, so
/// either both commit or neither does. `uniq` is the conflict key:
/// re-processing the same log is a no-op.
#[derive(Debug)]
pub struct OutboxWriter;

impl OutboxWriter {
    /// Inserts the outbox row for `event`, keyed by the source log.
    ///
    /// The transaction hash is normalized to canonical lower-case
    /// `0x`-prefixed form before the key is built, so historical
    /// formatting differences never create duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure or
    /// [`IndexerError::Serialization`] if the payload cannot be encoded.
    pub async fn append(
        conn: &mut PgConnection,
        source: &SourceLog,
        event: &DomainEvent,
    ) -> Result<(), IndexerError> {
        let tx_hash = normalize_tx_hash(&source.tx_hash);
        let uniq = source.uniq();
        let payload = serde_json::to_value(event)?;

        sqlx::query(
            "INSERT INTO outbox_events (uniq, event_type, chain_id, block_number, tx_hash, \
             log_index, auction_address, round_id, from_token, want_token, event_timestamp, \
             payload, ver) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (uniq) DO NOTHING",
        )
        .bind(&uniq)
        .bind(event.event_type_str())
        .bind(source.chain_id)
        .bind(source.block_number)
        .bind(&tx_hash)
        .bind(source.log_index)
        .bind(event.auction_address())
        .bind(event.round_id())
        .bind(event.from_token())
        .bind(event.want_token())
        .bind(source.timestamp)
        .bind(&payload)
        .bind(EVENT_SCHEMA_VERSION)
        .execute(conn)
        .await?;
        Ok(())
    }
}
