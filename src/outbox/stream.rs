//! Durable stream publication (Redis Streams).
//!
//! [`EventPublisher`] is the seam between the relay and the transport;
//! the production implementation appends JSON entries to two Redis
//! streams (main and dead-letter) via `XADD`. Delivery is at-least-once:
//! consumers deduplicate on `uniq`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::persistence::OutboxRow;

/// One stream entry, published per outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Event classification (`deploy` / `kick` / `take`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Chain the source log was emitted on.
    pub chain_id: i64,
    /// Block containing the source log.
    pub block_number: i64,
    /// Transaction hash (canonical lower-case hex).
    pub tx_hash: String,
    /// Log index within the transaction's receipt.
    pub log_index: i64,
    /// Auction the event concerns.
    pub auction_address: String,
    /// Round id, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    /// Token being sold, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_token: Option<String>,
    /// Payment token, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub want_token: Option<String>,
    /// Timestamp of the source block.
    pub timestamp: DateTime<Utc>,
    /// Idempotency key; consumers MUST deduplicate on this.
    pub uniq: String,
    /// Payload schema version.
    pub ver: String,
    /// Opaque JSON payload (the serialized domain event).
    pub payload: serde_json::Value,
}

impl StreamEntry {
    /// Builds the published entry from an outbox row.
    #[must_use]
    pub fn from_row(row: &OutboxRow) -> Self {
        Self {
            event_type: row.event_type.clone(),
            chain_id: row.chain_id,
            block_number: row.block_number,
            tx_hash: row.tx_hash.clone(),
            log_index: row.log_index,
            auction_address: row.auction_address.clone(),
            round_id: row.round_id,
            from_token: row.from_token.clone(),
            want_token: row.want_token.clone(),
            timestamp: row.event_timestamp,
            uniq: row.uniq.clone(),
            ver: row.ver.clone(),
            payload: row.payload.clone(),
        }
    }
}

/// Entry written to the dead-letter stream once an event has exhausted
/// its publish retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Full copy of the event that could not be delivered.
    pub original_event: StreamEntry,
    /// When the event was dead-lettered.
    pub failure_time: DateTime<Utc>,
    /// Publish attempts made.
    pub retries: i32,
    /// Message of the final failure.
    pub last_error: String,
}

/// Transport seam for the relay.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one entry to the durable stream.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Publish`] when the entry could not be
    /// appended; the relay counts the failure and retries later.
    async fn publish(&self, entry: &StreamEntry) -> Result<(), IndexerError>;

    /// Publishes one entry to the dead-letter stream.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Publish`] on failure; the relay leaves the
    /// row pending so dead-lettering is retried too.
    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), IndexerError>;
}

/// Redis Streams publisher (`XADD`, auto-generated ids).
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream_key: String,
    dead_letter_key: String,
}

impl RedisStreamPublisher {
    /// Connects to Redis and prepares a managed connection.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Publish`] if the connection cannot be
    /// established.
    pub async fn connect(
        redis_url: &str,
        stream_key: String,
        dead_letter_key: String,
    ) -> Result<Self, IndexerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            stream_key,
            dead_letter_key,
        })
    }

    async fn xadd(&self, key: &str, body: &str) -> Result<(), IndexerError> {
        let mut conn = self.conn.clone();
        let _id: String = conn.xadd(key, "*", &[("event", body)]).await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, entry: &StreamEntry) -> Result<(), IndexerError> {
        let body = serde_json::to_string(entry)?;
        self.xadd(&self.stream_key, &body).await
    }

    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), IndexerError> {
        let body = serde_json::to_string(entry)?;
        self.xadd(&self.dead_letter_key, &body).await
    }
}

impl std::fmt::Debug for RedisStreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamPublisher")
            .field("stream_key", &self.stream_key)
            .field("dead_letter_key", &self.dead_letter_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> OutboxRow {
        let Some(ts) = Utc.timestamp_opt(1_700_000_000, 0).single() else {
            panic!("valid timestamp");
        };
        OutboxRow {
            id: 1,
            uniq: "1:aabb:0".to_string(),
            event_type: "kick".to_string(),
            chain_id: 1,
            block_number: 100,
            tx_hash: "0xaabb".to_string(),
            log_index: 0,
            auction_address: "0xauction".to_string(),
            round_id: Some(1),
            from_token: Some("0xfrom".to_string()),
            want_token: None,
            event_timestamp: ts,
            payload: serde_json::json!({"event_type": "kick"}),
            ver: "1".to_string(),
            retries: 0,
            last_error: None,
        }
    }

    #[test]
    fn entry_carries_row_envelope() {
        let entry = StreamEntry::from_row(&row());
        assert_eq!(entry.uniq, "1:aabb:0");
        assert_eq!(entry.event_type, "kick");
        assert_eq!(entry.round_id, Some(1));
    }

    #[test]
    fn entry_serializes_type_field_and_omits_empty_options() {
        let entry = StreamEntry::from_row(&row());
        let Ok(json) = serde_json::to_string(&entry) else {
            panic!("serializes");
        };
        assert!(json.contains("\"type\":\"kick\""));
        assert!(!json.contains("want_token"));
    }
}
