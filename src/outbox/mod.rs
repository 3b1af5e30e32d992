//! Transactional outbox: writer, durable-stream publisher, and relay.
//!
//! Domain writes and their outbox rows commit atomically; the relay
//! drains committed rows into a durable ordered stream with bounded
//! retries and dead-lettering, so no event is silently lost.

pub mod relay;
pub mod stream;
pub mod writer;

pub use relay::{OutboxRelay, PassStats};
pub use stream::{DeadLetterEntry, EventPublisher, RedisStreamPublisher, StreamEntry};
pub use writer::OutboxWriter;
