//! Database row models shared across components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AuctionVersion;

/// Minimal auction projection the scanner keeps in memory: enough to
/// build log filters and to know which detection paths apply.
#[derive(Debug, Clone)]
pub struct TrackedAuction {
    /// Auction contract address (canonical lower-case hex).
    pub address: String,
    /// ABI generation; decides whether the transfer fallback runs.
    pub version: AuctionVersion,
    /// Payment token recorded at deployment.
    pub want_token: String,
}

/// An outbox row as read by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRow {
    /// Auto-increment row ID; relay drains in id order.
    pub id: i64,
    /// Idempotency key (`"{chain_id}:{tx_hash}:{log_index}"`).
    pub uniq: String,
    /// Event classification (`deploy` / `kick` / `take`).
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
    pub round_id: Option<i64>,
    /// Token being sold, when the event carries one.
    pub from_token: Option<String>,
    /// Payment token, when the event carries one.
    pub want_token: Option<String>,
    /// Timestamp of the source block.
    pub event_timestamp: DateTime<Utc>,
    /// Opaque JSON payload (the serialized domain event).
    pub payload: serde_json::Value,
    /// Payload schema version.
    pub ver: String,
    /// Failed publish attempts so far.
    pub retries: i32,
    /// Message of the most recent publish failure.
    pub last_error: Option<String>,
}
