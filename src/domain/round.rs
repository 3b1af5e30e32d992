//! Auction rounds ("kicks") and the round-resolution policy for takes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-bounded selling period of an auction, keyed by
/// `(auction_address, chain_id, round_id)`.
///
/// `round_id` values are allocated as `max(existing) + 1` per auction.
/// At most one round per auction is active at a time (best-effort: the
/// previous active round is deactivated before a new one is inserted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Auction the round belongs to.
    pub auction_address: String,
    /// Chain the auction lives on.
    pub chain_id: i64,
    /// Sequential round number, starting at 1.
    pub round_id: i64,
    /// Token being sold this round.
    pub from_token: String,
    /// Amount available when the round was kicked (string-encoded uint256).
    pub initial_available: String,
    /// Remaining amount after recorded takes (string-encoded uint256).
    pub available_amount: String,
    /// Number of takes recorded against this round.
    pub total_takes: i64,
    /// Cumulative amount sold (string-encoded uint256).
    pub total_volume_sold: String,
    /// Timestamp of the kick block.
    pub kicked_at: DateTime<Utc>,
    /// Whether this is the auction's current round.
    pub is_active: bool,
    /// Transaction hash of the kick log (canonical lower-case hex).
    /// Together with `kick_log_index` it makes replayed kicks no-ops.
    pub kick_tx_hash: String,
    /// Log index of the kick log.
    pub kick_log_index: i64,
}

/// Resolves the round a take belongs to.
///
/// `rounds` must be ordered most-recently-kicked first. The policy
/// prefers the newest round whose `from_token` matches the purchase,
/// then falls back to the newest round regardless of token. `None`
/// means no round exists at all and the caller records the take against
/// the sentinel round id 0.
#[must_use]
pub fn resolve_round<'a>(rounds: &'a [Round], from_token: &str) -> Option<&'a Round> {
    rounds
        .iter()
        .find(|r| r.from_token == from_token)
        .or_else(|| rounds.first())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round(round_id: i64, from_token: &str, kicked_secs: i64) -> Round {
        let Some(kicked_at) = Utc.timestamp_opt(kicked_secs, 0).single() else {
            panic!("valid timestamp");
        };
        Round {
            auction_address: "0xauction".to_string(),
            chain_id: 1,
            round_id,
            from_token: from_token.to_string(),
            initial_available: "1000".to_string(),
            available_amount: "1000".to_string(),
            total_takes: 0,
            total_volume_sold: "0".to_string(),
            kicked_at,
            is_active: round_id == 3,
            kick_tx_hash: format!("0x{round_id:064x}"),
            kick_log_index: 0,
        }
    }

    #[test]
    fn prefers_most_recent_matching_token() {
        // Most-recently-kicked first.
        let rounds = vec![
            round(3, "0xbbb", 300),
            round(2, "0xaaa", 200),
            round(1, "0xaaa", 100),
        ];
        let Some(resolved) = resolve_round(&rounds, "0xaaa") else {
            panic!("round should resolve");
        };
        assert_eq!(resolved.round_id, 2);
    }

    #[test]
    fn falls_back_to_most_recent_round() {
        let rounds = vec![round(2, "0xbbb", 200), round(1, "0xaaa", 100)];
        let Some(resolved) = resolve_round(&rounds, "0xccc") else {
            panic!("fallback should resolve");
        };
        assert_eq!(resolved.round_id, 2);
    }

    #[test]
    fn no_rounds_resolves_to_none() {
        assert!(resolve_round(&[], "0xaaa").is_none());
    }
}
