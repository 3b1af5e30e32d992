//! Chain access layer: provider wrapper, contract bindings, and the
//! per-generation auction parameter interface.

pub mod client;
pub(crate) mod contracts;
pub mod params;

pub use client::ChainClient;
pub use params::{AuctionParams, VersionedAuction};

use alloy::primitives::{Address, B256};

/// Canonical lower-case, `0x`-prefixed form of an address.
pub(crate) fn address_string(address: Address) -> String {
    format!("{address:#x}")
}

/// Canonical lower-case, `0x`-prefixed form of a 32-byte hash.
pub(crate) fn hash_string(hash: B256) -> String {
    format!("{hash:#x}")
}
