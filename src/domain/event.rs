//! Domain events emitted for every reconciled chain log.
//!
//! Each reconciled log produces exactly one [`DomainEvent`] paired with
//! the [`SourceLog`] it came from. The pair is written to the outbox in
//! the same transaction as the domain change and later relayed to the
//! durable stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AuctionVersion;

/// Schema version stamped on every published stream entry (`ver` field),
/// so consumers can migrate across payload changes.
pub const EVENT_SCHEMA_VERSION: &str = "1";

/// Normalizes a transaction hash to canonical lower-case, `0x`-prefixed
/// form. Historical logs carry mixed-case and prefix-less hashes; keys
/// built from the canonical form never alias.
#[must_use]
pub fn normalize_tx_hash(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    match lowered.strip_prefix("0x") {
        Some(rest) => format!("0x{rest}"),
        None => format!("0x{lowered}"),
    }
}

/// On-chain coordinates of the log a domain event was reconciled from.
///
/// Carries everything needed to replay the unit of work manually and to
/// build the outbox idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLog {
    /// Chain the log was emitted on.
    pub chain_id: i64,
    /// Block containing the transaction.
    pub block_number: i64,
    /// Transaction hash (canonical lower-case hex).
    pub tx_hash: String,
    /// Log index within the transaction's receipt.
    pub log_index: i64,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

impl SourceLog {
    /// Creates a source-log reference, normalizing the transaction hash.
    #[must_use]
    pub fn new(
        chain_id: i64,
        block_number: i64,
        tx_hash: &str,
        log_index: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            chain_id,
            block_number,
            tx_hash: normalize_tx_hash(tx_hash),
            log_index,
            timestamp,
        }
    }

    /// Deterministic idempotency key:
    /// `"{chain_id}:{tx_hash_without_0x}:{log_index}"`.
    #[must_use]
    pub fn uniq(&self) -> String {
        let hash = self.tx_hash.strip_prefix("0x").unwrap_or(&self.tx_hash);
        format!("{}:{}:{}", self.chain_id, hash, self.log_index)
    }
}

/// A normalized domain change, one per reconciled log.
///
/// Serialized (serde-tagged) as the opaque `payload` of the matching
/// outbox row. Amounts are string-encoded to preserve uint256 precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    /// A factory deployed a new auction instance.
    #[serde(rename = "deploy")]
    AuctionDeployed {
        /// Address of the new instance.
        auction_address: String,
        /// Token the auction accepts as payment.
        want_token: String,
        /// Account that triggered the deployment.
        deployer: String,
        /// ABI generation of the instance.
        version: AuctionVersion,
    },

    /// A new round was started ("kicked").
    #[serde(rename = "kick")]
    RoundKicked {
        /// Auction the round belongs to.
        auction_address: String,
        /// Allocated round id.
        round_id: i64,
        /// Token being sold this round.
        from_token: String,
        /// Amount available at kick time (string-encoded uint256).
        initial_available: String,
    },

    /// A purchase was recorded (from a take event or the transfer-log
    /// fallback — both produce the same shape).
    #[serde(rename = "take")]
    TakeRecorded {
        /// Auction the purchase was made against.
        auction_address: String,
        /// Round the purchase was matched to (0 = unmatched sentinel).
        round_id: i64,
        /// Position within the round, starting at 1.
        take_seq: i64,
        /// Buyer address.
        taker: String,
        /// Token bought.
        from_token: String,
        /// Token paid with.
        want_token: String,
        /// Amount bought (string-encoded uint256).
        amount_taken: String,
        /// Amount paid (string-encoded uint256).
        amount_paid: String,
        /// Effective per-unit price (string-encoded uint256).
        price: String,
    },
}

impl DomainEvent {
    /// Returns the event classification as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::AuctionDeployed { .. } => "deploy",
            Self::RoundKicked { .. } => "kick",
            Self::TakeRecorded { .. } => "take",
        }
    }

    /// Address of the auction this event concerns.
    #[must_use]
    pub fn auction_address(&self) -> &str {
        match self {
            Self::AuctionDeployed {
                auction_address, ..
            }
            | Self::RoundKicked {
                auction_address, ..
            }
            | Self::TakeRecorded {
                auction_address, ..
            } => auction_address,
        }
    }

    /// Round id, for events that carry one.
    #[must_use]
    pub const fn round_id(&self) -> Option<i64> {
        match self {
            Self::AuctionDeployed { .. } => None,
            Self::RoundKicked { round_id, .. } | Self::TakeRecorded { round_id, .. } => {
                Some(*round_id)
            }
        }
    }

    /// Token being sold, for events that carry one.
    #[must_use]
    pub fn from_token(&self) -> Option<&str> {
        match self {
            Self::AuctionDeployed { .. } => None,
            Self::RoundKicked { from_token, .. } | Self::TakeRecorded { from_token, .. } => {
                Some(from_token)
            }
        }
    }

    /// Payment token, for events that carry one.
    #[must_use]
    pub fn want_token(&self) -> Option<&str> {
        match self {
            Self::AuctionDeployed { want_token, .. }
            | Self::TakeRecorded { want_token, .. } => Some(want_token),
            Self::RoundKicked { .. } => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HASH: &str = "0xABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789";

    fn source() -> SourceLog {
        let Some(ts) = Utc.timestamp_opt(1_700_000_000, 0).single() else {
            panic!("valid timestamp");
        };
        SourceLog::new(137, 48_000_000, HASH, 7, ts)
    }

    #[test]
    fn tx_hash_is_normalized() {
        assert_eq!(
            source().tx_hash,
            "0xabcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
        );
    }

    #[test]
    fn missing_prefix_is_added() {
        assert_eq!(normalize_tx_hash("DEAD"), "0xdead");
    }

    #[test]
    fn uniq_strips_prefix() {
        assert_eq!(
            source().uniq(),
            "137:abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789:7"
        );
    }

    #[test]
    fn same_log_different_formatting_yields_same_uniq() {
        let Some(ts) = Utc.timestamp_opt(1_700_000_000, 0).single() else {
            panic!("valid timestamp");
        };
        let upper = SourceLog::new(1, 10, "0xAABB", 0, ts);
        let bare = SourceLog::new(1, 10, "aabb", 0, ts);
        assert_eq!(upper.uniq(), bare.uniq());
    }

    #[test]
    fn deploy_event_serializes_with_tag() {
        let event = DomainEvent::AuctionDeployed {
            auction_address: "0xauction".to_string(),
            want_token: "0xwant".to_string(),
            deployer: "0xdeployer".to_string(),
            version: AuctionVersion::V1,
        };
        let Ok(json) = serde_json::to_string(&event) else {
            panic!("serializes");
        };
        assert!(json.contains("\"event_type\":\"deploy\""));
        assert!(json.contains("\"0.1.0\""));
    }

    #[test]
    fn accessors_expose_envelope_fields() {
        let event = DomainEvent::TakeRecorded {
            auction_address: "0xauction".to_string(),
            round_id: 2,
            take_seq: 1,
            taker: "0xtaker".to_string(),
            from_token: "0xfrom".to_string(),
            want_token: "0xwant".to_string(),
            amount_taken: "100".to_string(),
            amount_paid: "95".to_string(),
            price: "0".to_string(),
        };
        assert_eq!(event.event_type_str(), "take");
        assert_eq!(event.round_id(), Some(2));
        assert_eq!(event.from_token(), Some("0xfrom"));
        assert_eq!(event.want_token(), Some("0xwant"));
        assert_eq!(event.auction_address(), "0xauction");
    }

    #[test]
    fn kick_has_no_want_token() {
        let event = DomainEvent::RoundKicked {
            auction_address: "0xauction".to_string(),
            round_id: 1,
            from_token: "0xfrom".to_string(),
            initial_available: "1000".to_string(),
        };
        assert!(event.want_token().is_none());
        assert_eq!(event.round_id(), Some(1));
    }
}
