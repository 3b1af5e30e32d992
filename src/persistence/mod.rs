//! Persistence layer: PostgreSQL domain tables and row models.
//!
//! [`AuctionStore`] wraps a `sqlx::PgPool` and owns every query against
//! the domain tables (auctions, rounds, takes, tokens, price requests).
//! Cursor and outbox queries live with their components.

pub mod models;
pub mod postgres;

pub use models::{OutboxRow, TrackedAuction};
pub use postgres::AuctionStore;
