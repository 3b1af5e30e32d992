//! Individual purchases ("takes") within a round.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Round id recorded for takes that could not be matched to any round.
/// Preserves auditability instead of dropping the purchase.
pub const SENTINEL_ROUND_ID: i64 = 0;

/// A single purchase within a round, keyed by
/// `(auction_address, chain_id, round_id, take_seq)`.
///
/// `take_seq` is allocated as `round.total_takes + 1` at processing time,
/// so per-round sequences are gapless and start at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Take {
    /// Auction the purchase was made against.
    pub auction_address: String,
    /// Chain the purchase happened on.
    pub chain_id: i64,
    /// Round the purchase was matched to (0 = unmatched sentinel).
    pub round_id: i64,
    /// Position of this take within its round, starting at 1.
    pub take_seq: i64,
    /// Buyer address.
    pub taker: String,
    /// Token bought.
    pub from_token: String,
    /// Token paid with.
    pub want_token: String,
    /// Amount bought (string-encoded uint256).
    pub amount_taken: String,
    /// Amount paid (string-encoded uint256).
    pub amount_paid: String,
    /// Effective price paid per unit (string-encoded uint256).
    pub price: String,
    /// Seconds between the round kick and this purchase, clamped at 0.
    pub seconds_from_round_start: i64,
    /// Block the purchase was mined in.
    pub block_number: i64,
    /// Transaction hash (canonical lower-case hex).
    pub tx_hash: String,
    /// Log index within the transaction's receipt.
    pub log_index: i64,
}

/// Computes the effective per-unit price of a take.
///
/// Integer division `amount_paid / amount_taken`; when `amount_taken` is
/// zero the division is undefined and `amount_paid` is returned as-is.
#[must_use]
pub fn take_price(amount_taken: U256, amount_paid: U256) -> U256 {
    if amount_taken.is_zero() {
        amount_paid
    } else {
        amount_paid / amount_taken
    }
}

/// Seconds elapsed between a round kick and a purchase, clamped at zero.
///
/// Returns `(seconds, clamped)`; `clamped` is `true` when the raw value
/// was negative (out-of-order processing or clock skew), which callers
/// log as a warning.
#[must_use]
pub fn seconds_from_round_start(
    take_timestamp: DateTime<Utc>,
    kicked_at: DateTime<Utc>,
) -> (i64, bool) {
    let raw = take_timestamp.signed_duration_since(kicked_at).num_seconds();
    if raw < 0 { (0, true) } else { (raw, false) }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        let Some(t) = Utc.timestamp_opt(secs, 0).single() else {
            panic!("valid timestamp");
        };
        t
    }

    #[test]
    fn price_is_integer_division() {
        // 95 / 100 truncates to 0 — sub-unit prices round down.
        assert_eq!(take_price(U256::from(100), U256::from(95)), U256::ZERO);
        assert_eq!(take_price(U256::from(100), U256::from(250)), U256::from(2));
    }

    #[test]
    fn zero_amount_taken_returns_amount_paid() {
        assert_eq!(take_price(U256::ZERO, U256::from(95)), U256::from(95));
    }

    #[test]
    fn seconds_clamps_negative_to_zero() {
        let (secs, clamped) = seconds_from_round_start(ts(100), ts(150));
        assert_eq!(secs, 0);
        assert!(clamped);
    }

    #[test]
    fn seconds_positive_passes_through() {
        let (secs, clamped) = seconds_from_round_start(ts(150), ts(100));
        assert_eq!(secs, 50);
        assert!(!clamped);
    }
}
