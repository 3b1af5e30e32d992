//! Domain layer: normalized auction records and domain events.
//!
//! This module contains the relational domain model produced by the
//! reconciler (auctions, rounds, takes and token metadata) plus the
//! [`DomainEvent`] enum describing every change the pipeline publishes.

pub mod auction;
pub mod event;
pub mod round;
pub mod take;
pub mod token;

pub use auction::{Auction, AuctionVersion};
pub use event::{DomainEvent, EVENT_SCHEMA_VERSION, SourceLog};
pub use round::{Round, resolve_round};
pub use take::{SENTINEL_ROUND_ID, Take, seconds_from_round_start, take_price};
pub use token::Token;
