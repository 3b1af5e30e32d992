//! Persisted scan progress per (chain, factory).

use sqlx::PgPool;

use crate::error::IndexerError;

/// Crash-safe scan cursor store.
///
/// The cursor is advanced only after a block range has been fully
/// reconciled, so a crash reprocesses at most one in-flight batch,
/// which is safe because every downstream write is idempotent.
#[derive(Debug, Clone)]
pub struct CursorStore {
    pool: PgPool,
}

impl CursorStore {
    /// Creates a cursor store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the last indexed block for `(chain_id, factory_address)`,
    /// initializing the cursor from the factory's configured start block
    /// (and persisting that initialization) when absent. The first block
    /// the scanner processes after initialization is `start_block` itself.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn get(
        &self,
        chain_id: i64,
        factory_address: &str,
        start_block: i64,
    ) -> Result<i64, IndexerError> {
        let initial = start_block.saturating_sub(1).max(0);
        sqlx::query(
            "INSERT INTO cursors (chain_id, factory_address, last_indexed_block, start_block) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (chain_id, factory_address) DO NOTHING",
        )
        .bind(chain_id)
        .bind(factory_address)
        .bind(initial)
        .bind(start_block)
        .execute(&self.pool)
        .await?;

        let last = sqlx::query_scalar::<_, i64>(
            "SELECT last_indexed_block FROM cursors \
             WHERE chain_id = $1 AND factory_address = $2",
        )
        .bind(chain_id)
        .bind(factory_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(last)
    }

    /// Advances the cursor to `block_number`. Monotonic: the stored value
    /// never decreases.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Database`] on database failure.
    pub async fn advance(
        &self,
        chain_id: i64,
        factory_address: &str,
        block_number: i64,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE cursors SET \
             last_indexed_block = GREATEST(last_indexed_block, $3), updated_at = now() \
             WHERE chain_id = $1 AND factory_address = $2",
        )
        .bind(chain_id)
        .bind(factory_address)
        .bind(block_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
