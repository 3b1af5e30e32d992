//! Auction instances and their ABI generations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// ABI/behavior generation of a deployed auction contract.
///
/// The generation decides how the want token is resolved at deployment
/// time, which parameter accessors exist on-chain, and whether the
/// contract emits a dedicated take event (legacy contracts do not, which
/// is why the transfer-log fallback exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionVersion {
    /// Legacy generation: want token in the deployment event arguments,
    /// reduced accessor set, unreliable take event.
    #[serde(rename = "0.0.1")]
    V0,
    /// Modern generation: want token via contract call, full accessor
    /// set, dedicated take event.
    #[serde(rename = "0.1.0")]
    V1,
}

impl AuctionVersion {
    /// Returns the stored version tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V0 => "0.0.1",
            Self::V1 => "0.1.0",
        }
    }

    /// Whether this generation emits a dedicated take event reliably.
    /// When `false`, purchases are reconstructed from transfer logs.
    #[must_use]
    pub const fn has_reliable_take_event(self) -> bool {
        matches!(self, Self::V1)
    }

    /// Whether the deployment event carries the want token in its
    /// arguments (legacy) instead of requiring a contract call (modern).
    #[must_use]
    pub const fn want_token_in_event(self) -> bool {
        matches!(self, Self::V0)
    }
}

impl fmt::Display for AuctionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuctionVersion {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0.0.1" => Ok(Self::V0),
            "0.1.0" => Ok(Self::V1),
            other => Err(IndexerError::Decode(format!(
                "unknown auction version tag: {other}"
            ))),
        }
    }
}

/// A deployed Dutch-auction contract instance, keyed by
/// `(address, chain_id)`.
///
/// Amount-like parameters are string-encoded decimal to preserve full
/// uint256 precision when serialized to JSON or stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    /// Auction contract address (canonical lower-case hex).
    pub address: String,
    /// Chain the instance is deployed on.
    pub chain_id: i64,
    /// Factory that deployed the instance.
    pub factory_address: String,
    /// Account that triggered the deployment.
    pub deployer: String,
    /// Token the auction accepts as payment.
    pub want_token: String,
    /// Price decay rate per step (string-encoded uint256).
    pub step_decay_rate: String,
    /// Starting price of each round (string-encoded uint256).
    pub starting_price: String,
    /// Seconds between price updates within a round.
    pub step_duration: i64,
    /// Total length of a round in seconds.
    pub round_length: i64,
    /// ABI generation of this instance.
    pub version: AuctionVersion,
    /// Timestamp of the deployment block.
    pub deployed_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn version_tag_round_trip() {
        for version in [AuctionVersion::V0, AuctionVersion::V1] {
            let Ok(parsed) = version.as_str().parse::<AuctionVersion>() else {
                panic!("tag should parse");
            };
            assert_eq!(parsed, version);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!("2.0.0".parse::<AuctionVersion>().is_err());
    }

    #[test]
    fn legacy_needs_transfer_fallback() {
        assert!(!AuctionVersion::V0.has_reliable_take_event());
        assert!(AuctionVersion::V1.has_reliable_take_event());
    }

    #[test]
    fn legacy_carries_want_in_event() {
        assert!(AuctionVersion::V0.want_token_in_event());
        assert!(!AuctionVersion::V1.want_token_in_event());
    }

    #[test]
    fn serde_uses_version_tags() {
        let Ok(json) = serde_json::to_string(&AuctionVersion::V0) else {
            panic!("serializes");
        };
        assert_eq!(json, "\"0.0.1\"");
    }
}
