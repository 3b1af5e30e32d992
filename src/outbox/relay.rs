//! Outbox relay: drains committed outbox rows into the durable stream.
//!
//! Rows are claimed with `FOR UPDATE SKIP LOCKED`, so multiple relay
//! instances can run concurrently without double-claiming. Per row the
//! state machine is `pending → published` on success, or
//! `pending → pending(retries+1) → … → dead-lettered` once the retry
//! limit is reached, at which point the row is also marked published so
//! it never blocks the queue, and a full copy goes to the dead-letter
//! stream.

use std::time::Duration;

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stream::{DeadLetterEntry, EventPublisher, StreamEntry};
use crate::error::IndexerError;
use crate::persistence::OutboxRow;

/// Longest `last_error` stored on a row; provider messages can be huge.
const MAX_STORED_ERROR_LEN: usize = 512;

/// Counters for one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Rows claimed this pass.
    pub claimed: usize,
    /// Rows published to the stream.
    pub published: usize,
    /// Rows that failed and stay pending.
    pub failed: usize,
    /// Rows dead-lettered this pass.
    pub dead_lettered: usize,
}

/// Adaptive idle backoff: the poll interval doubles (bounded) while
/// passes find no work and snaps back to baseline as soon as work shows
/// up, so an empty queue is not busy-polled.
#[derive(Debug, Clone)]
struct IdleBackoff {
    baseline: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    fn new(baseline: Duration, max: Duration) -> Self {
        let max = max.max(baseline);
        Self {
            baseline,
            max,
            current: baseline,
        }
    }

    fn current(&self) -> Duration {
        self.current
    }

    fn grow(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    fn reset(&mut self) {
        self.current = self.baseline;
    }
}

/// Truncates an error message for storage on the outbox row.
fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_STORED_ERROR_LEN).collect()
}

/// Relay process draining the outbox table.
#[derive(Debug)]
pub struct OutboxRelay<P> {
    pool: PgPool,
    publisher: P,
    batch_size: i64,
    retry_limit: i32,
    poll_interval: Duration,
    max_poll_interval: Duration,
}

impl<P: EventPublisher> OutboxRelay<P> {
    /// Creates a relay over `pool` publishing through `publisher`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        publisher: P,
        batch_size: i64,
        retry_limit: i32,
        poll_interval: Duration,
        max_poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            publisher,
            batch_size,
            retry_limit,
            poll_interval,
            max_poll_interval,
        }
    }

    /// Runs the relay loop until `cancel` fires. Cancellation is honored
    /// between passes only, so no row is left half-published.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(batch_size = self.batch_size, retry_limit = self.retry_limit, "outbox relay started");
        let mut backoff = IdleBackoff::new(self.poll_interval, self.max_poll_interval);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(backoff.current()) => {}
            }

            match self.run_once().await {
                Ok(stats) => {
                    if stats.claimed == 0 {
                        backoff.grow();
                    } else {
                        backoff.reset();
                        debug!(
                            claimed = stats.claimed,
                            published = stats.published,
                            failed = stats.failed,
                            dead_lettered = stats.dead_lettered,
                            "relay pass complete"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "relay pass failed");
                    backoff.grow();
                }
            }
        }

        info!("outbox relay stopped");
    }

    /// Claims and processes one batch of unpublished rows.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] when claiming or committing
    /// fails; individual publish failures are counted, not propagated.
    pub async fn run_once(&self) -> Result<PassStats, IndexerError> {
        let mut tx = self.pool.begin().await?;
        let rows = claim_batch(&mut tx, self.batch_size).await?;

        let mut stats = PassStats {
            claimed: rows.len(),
            ..PassStats::default()
        };

        for row in &rows {
            let entry = StreamEntry::from_row(row);
            match self.publisher.publish(&entry).await {
                Ok(()) => {
                    mark_published(&mut tx, row.id).await?;
                    stats.published += 1;
                }
                Err(e) => {
                    let retries = row.retries.saturating_add(1);
                    let last_error = truncate_error(&e.to_string());
                    if retries >= self.retry_limit {
                        if self.dead_letter(&entry, retries, &last_error).await {
                            mark_dead_lettered(&mut tx, row.id, retries, &last_error).await?;
                            stats.dead_lettered += 1;
                        } else {
                            // DLQ write failed too; leave pending for the
                            // next pass.
                            record_failure(&mut tx, row.id, retries, &last_error).await?;
                            stats.failed += 1;
                        }
                    } else {
                        warn!(
                            uniq = %row.uniq,
                            retries,
                            error = %last_error,
                            "publish failed, will retry"
                        );
                        record_failure(&mut tx, row.id, retries, &last_error).await?;
                        stats.failed += 1;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    /// Publishes the dead-letter entry; returns `false` on failure.
    async fn dead_letter(&self, entry: &StreamEntry, retries: i32, last_error: &str) -> bool {
        let dead = DeadLetterEntry {
            original_event: entry.clone(),
            failure_time: Utc::now(),
            retries,
            last_error: last_error.to_string(),
        };
        match self.publisher.publish_dead_letter(&dead).await {
            Ok(()) => {
                warn!(uniq = %entry.uniq, retries, "event dead-lettered");
                true
            }
            Err(e) => {
                error!(uniq = %entry.uniq, error = %e, "dead-letter publish failed");
                false
            }
        }
    }
}

/// Claims up to `limit` unpublished rows, skipping rows locked by other
/// relay instances.
async fn claim_batch(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<OutboxRow>, IndexerError> {
    let rows = sqlx::query_as::<_, OutboxRow>(
        "SELECT id, uniq, event_type, chain_id, block_number, tx_hash, log_index, \
         auction_address, round_id, from_token, want_token, event_timestamp, payload, ver, \
         retries, last_error \
         FROM outbox_events WHERE published_at IS NULL \
         ORDER BY id LIMIT $1 FOR UPDATE SKIP LOCKED",
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

async fn mark_published(conn: &mut PgConnection, id: i64) -> Result<(), IndexerError> {
    sqlx::query("UPDATE outbox_events SET published_at = now() WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn record_failure(
    conn: &mut PgConnection,
    id: i64,
    retries: i32,
    last_error: &str,
) -> Result<(), IndexerError> {
    sqlx::query("UPDATE outbox_events SET retries = $2, last_error = $3 WHERE id = $1")
        .bind(id)
        .bind(retries)
        .bind(last_error)
        .execute(conn)
        .await?;
    Ok(())
}

async fn mark_dead_lettered(
    conn: &mut PgConnection,
    id: i64,
    retries: i32,
    last_error: &str,
) -> Result<(), IndexerError> {
    sqlx::query(
        "UPDATE outbox_events SET published_at = now(), retries = $2, last_error = $3 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(retries)
    .bind(last_error)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_bounded() {
        let mut backoff = IdleBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(backoff.current(), Duration::from_secs(1));

        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_secs(2));
        backoff.grow();
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_secs(8));
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_secs(8));
    }

    #[test]
    fn backoff_resets_to_baseline() {
        let mut backoff = IdleBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
        backoff.grow();
        backoff.grow();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn max_below_baseline_is_coerced() {
        let mut backoff = IdleBackoff::new(Duration::from_secs(5), Duration::from_secs(1));
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    #[test]
    fn long_errors_are_truncated() {
        let long = "x".repeat(2_000);
        assert_eq!(truncate_error(&long).len(), MAX_STORED_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }
}
