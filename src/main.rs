//! auction-indexer service entry point.
//!
//! Starts one scan loop per configured network plus the outbox relay,
//! and shuts them down at batch/row boundaries on SIGINT.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use auction_indexer::chain::ChainClient;
use auction_indexer::config::IndexerConfig;
use auction_indexer::outbox::{OutboxRelay, RedisStreamPublisher};
use auction_indexer::persistence::AuctionStore;
use auction_indexer::reconciler::Reconciler;
use auction_indexer::scanner::{CursorStore, FactoryScanner, NetworkScanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = IndexerConfig::from_env()?;
    tracing::info!(networks = config.networks.len(), "starting auction-indexer");

    // Database pool + migrations
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let store = AuctionStore::new(pool.clone());
    let cursors = CursorStore::new(pool.clone());

    // Durable stream publisher
    let publisher = RedisStreamPublisher::connect(
        &config.redis_url,
        config.event_stream_key.clone(),
        config.dead_letter_stream_key.clone(),
    )
    .await?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // One scan loop per network; factories within a network run
    // sequentially inside it.
    for network in &config.networks {
        let client = Arc::new(ChainClient::connect(
            &network.rpc_url,
            network.chain_id,
            Duration::from_secs(config.rpc_call_timeout_secs),
            config.block_timestamp_cache_capacity,
        )?);
        let chain_id = i64::try_from(network.chain_id)?;
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&client),
            store.clone(),
            chain_id,
            config.token_cache_capacity,
        ));

        let factories = network
            .factories
            .iter()
            .map(|factory| {
                FactoryScanner::new(
                    Arc::clone(&client),
                    store.clone(),
                    cursors.clone(),
                    Arc::clone(&reconciler),
                    network.name.clone(),
                    chain_id,
                    factory.clone(),
                    config.block_batch_size,
                    config.min_bisect_span,
                )
            })
            .collect();

        let scanner = NetworkScanner::new(
            network.name.clone(),
            Duration::from_secs(config.scan_poll_interval_secs),
            Duration::from_secs(config.scan_retry_backoff_secs),
            factories,
        );
        tasks.push(tokio::spawn(scanner.run(cancel.clone())));
    }

    // Outbox relay (independently schedulable; more instances may run
    // as separate processes).
    let relay = OutboxRelay::new(
        pool.clone(),
        publisher,
        config.relay_batch_size,
        config.relay_retry_limit,
        Duration::from_millis(config.relay_poll_interval_ms),
        Duration::from_millis(config.relay_max_poll_interval_ms),
    );
    let relay_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move { relay.run(relay_cancel).await }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("auction-indexer stopped");

    Ok(())
}
