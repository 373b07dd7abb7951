//! Memory Cache demo
//!
//! Exercises the cache the way a request-handling application would:
//! dependency invalidation through a shared token, single-flight creation
//! under concurrent load, and sliding expiration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memory_cache::{
    spawn_expiration_scanner, CacheError, Config, EntryOptions, ExpirationToken, MemoryCache,
};

/// Main entry point for the cache demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache
/// 4. Start the background expiration scanner
/// 5. Run the demo scenarios
/// 6. Stop the scanner and report statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memory_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting memory cache demo");

    let config = Config::from_env();
    info!(
        "Configuration loaded: shards={}, max_entries={:?}, compaction={}, scan_interval={}ms",
        config.shard_count, config.max_entries, config.compaction_percentage, config.scan_interval_ms
    );

    let cache: MemoryCache<String> =
        MemoryCache::new(&config).context("failed to create cache")?;
    info!("Cache store initialized");

    let scanner = spawn_expiration_scanner(cache.clone(), config.scan_interval());
    info!("Background expiration scanner started");

    dependent_entries(&cache)?;
    single_flight(&cache).await?;
    sliding_window(&cache).await?;

    scanner.abort();

    let stats = cache.stats();
    info!(
        "Final statistics: {}",
        serde_json::to_string(&stats).context("failed to serialize stats")?
    );
    info!("Demo complete");
    Ok(())
}

/// Parent and child share one token; cancelling it evicts both, and the
/// parent's callback leaves a message behind.
fn dependent_entries(cache: &MemoryCache<String>) -> anyhow::Result<()> {
    let token = ExpirationToken::new();

    cache.set(
        "parent",
        chrono::Utc::now().to_rfc3339(),
        EntryOptions::new()
            .expiration_token(token.clone())
            .post_eviction_callback(|cache, notice| {
                let message = format!(
                    "'{}' was evicted. Reason: {}",
                    notice.key, notice.reason
                );
                cache.set("msg", message, EntryOptions::new())?;
                Ok(())
            }),
    )?;
    cache.set(
        "child",
        chrono::Utc::now().to_rfc3339(),
        EntryOptions::new().expiration_token(token.clone()),
    )?;

    token.cancel();

    let message = cache.get("msg").context("parent callback did not run")?;
    info!(
        parent = cache.get("parent").is_some(),
        child = cache.get("child").is_some(),
        "dependent entries invalidated: {}",
        message
    );
    Ok(())
}

/// Many concurrent callers ask for the same missing key; the factory runs once.
async fn single_flight(cache: &MemoryCache<String>) -> anyhow::Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create_async("report", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, CacheError>(("expensive report".to_string(), EntryOptions::new()))
                    })
                    .await
            })
        })
        .collect();

    for caller in callers {
        caller.await.context("caller task failed")??;
    }

    info!(
        "single-flight: 16 callers, factory invoked {} time(s)",
        calls.load(Ordering::SeqCst)
    );
    Ok(())
}

/// An entry read inside its sliding window stays; one left alone expires.
async fn sliding_window(cache: &MemoryCache<String>) -> anyhow::Result<()> {
    let window = chrono::Duration::milliseconds(200);
    cache.set(
        "session",
        "active".to_string(),
        EntryOptions::new().sliding_expiration(window),
    )?;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!(alive = cache.get("session").is_some(), "session read inside window");
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    info!(alive = cache.get("session").is_some(), "session read after idling");
    Ok(())
}
