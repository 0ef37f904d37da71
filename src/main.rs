// Harvester binary: scrolls each configured target site to convergence
// and persists the extracted events into the time-bucketed SQLite store.
//
// Usage:
//   scrollharvest [queries_file]     harvest every target in the list
//   scrollharvest dump <target>      print every stored bucket for a target

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scrollharvest::store::BucketStore;
use scrollharvest::{Bucket, HarvestConfig, SqliteBucketStore, harvest};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chromiumoxide=warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = HarvestConfig::default();
    let store = SqliteBucketStore::open(config.database_path()).await?;

    match args.get(1).map(String::as_str) {
        Some("dump") => {
            let target = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: scrollharvest dump <target>"))?;
            dump_target(&store, target).await?;
        }
        Some(queries_file) => {
            config = config.with_queries_file(queries_file);
            let summary = harvest(&config, &store).await;
            info!(
                "{}/{} targets succeeded, {} failed",
                summary.succeeded, summary.targets, summary.failed
            );
        }
        None => {
            let summary = harvest(&config, &store).await;
            info!(
                "{}/{} targets succeeded, {} failed",
                summary.succeeded, summary.targets, summary.failed
            );
        }
    }

    store.close().await;

    // Per-target failures are visible in the logs only; the process
    // itself completes successfully either way.
    Ok(())
}

/// Print every stored bucket for a target as JSON documents.
async fn dump_target(store: &SqliteBucketStore, target: &str) -> Result<()> {
    let collection = target.trim().to_lowercase();
    let buckets = store.list_buckets(&collection).await?;

    if buckets.is_empty() {
        info!("No buckets stored for '{}'", collection);
        return Ok(());
    }

    info!("Found {} buckets for '{}'", buckets.len(), collection);
    for bucket in buckets {
        info!(
            "Bucket '{}': {} events",
            bucket.bucket_key,
            bucket.events.len()
        );
        println!("{}", render_bucket(&bucket)?);
    }
    Ok(())
}

/// Render one bucket as a pretty-printed JSON document.
fn render_bucket(bucket: &Bucket) -> Result<String> {
    Ok(serde_json::to_string_pretty(bucket)?)
}
