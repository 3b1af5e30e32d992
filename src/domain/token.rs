//! Lazily discovered ERC-20 token metadata.

use serde::{Deserialize, Serialize};

/// Token metadata keyed by `(address, chain_id)`.
///
/// Discovered on first reference. Every field is optional: a token whose
/// `symbol()` call reverts is still stored with what could be read.
/// Partial metadata is data, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Token contract address (canonical lower-case hex).
    pub address: String,
    /// Chain the token lives on.
    pub chain_id: i64,
    /// ERC-20 symbol, if readable.
    pub symbol: Option<String>,
    /// ERC-20 name, if readable.
    pub name: Option<String>,
    /// ERC-20 decimals, if readable.
    pub decimals: Option<i32>,
}

impl Token {
    /// Decimals to use for amount scaling, defaulting to 18 when the
    /// on-chain value could not be read.
    #[must_use]
    pub fn decimals_or_default(&self) -> i32 {
        self.decimals.unwrap_or(18)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_default_to_eighteen() {
        let token = Token {
            address: "0xtoken".to_string(),
            chain_id: 1,
            symbol: None,
            name: None,
            decimals: None,
        };
        assert_eq!(token.decimals_or_default(), 18);
    }

    #[test]
    fn known_decimals_win() {
        let token = Token {
            address: "0xtoken".to_string(),
            chain_id: 1,
            symbol: Some("USDC".to_string()),
            name: Some("USD Coin".to_string()),
            decimals: Some(6),
        };
        assert_eq!(token.decimals_or_default(), 6);
    }
}
