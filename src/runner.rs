//! Per-target run loop
//!
//! Targets are processed sequentially, one browser session each. Every
//! session is released on every exit path, and one target's failure is
//! logged and never aborts the rest of the run. Partial batches salvaged
//! from a mid-harvest fault are persisted before the failure is reported.

use tracing::{error, info, warn};
use url::Url;

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::extract::{HarvestBatch, harvest_page};
use crate::queries::load_targets;
use crate::session::{PageSession, SessionProvider};
use crate::store::{BucketStore, write_batch};

/// Outcome counts for one run across all targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Build the target URL: the target identifier is used directly as a
/// subdomain label.
///
/// No sanitization beyond trimming happens upstream, so a malformed
/// identifier surfaces here as a navigation-phase failure rather than a
/// crash.
pub fn target_url(target: &str, source_domain: &str) -> Result<String, HarvestError> {
    let url = format!("https://{target}.{source_domain}/");
    Url::parse(&url).map_err(|e| HarvestError::Session {
        message: format!("target '{target}' does not form a valid URL: {e}"),
        partial: Vec::new(),
    })?;
    Ok(url)
}

/// Process every configured target in sequence.
///
/// A missing or unreadable query source is reported and yields an empty
/// run. The summary is returned instead of an error: per-target failures
/// are observable through log output, not through the process exit code.
pub async fn run_all<P, S>(config: &HarvestConfig, provider: &P, store: &S) -> RunSummary
where
    P: SessionProvider,
    S: BucketStore + ?Sized,
{
    let targets = match load_targets(config.queries_file()).await {
        Ok(targets) => targets,
        Err(e) => {
            error!("{e}; nothing to harvest");
            Vec::new()
        }
    };

    let mut summary = RunSummary {
        targets: targets.len(),
        succeeded: 0,
        failed: 0,
    };

    for target in &targets {
        match run_target(config, provider, store, target).await {
            Ok(count) => {
                info!("Target '{}' done, {} events persisted", target, count);
                summary.succeeded += 1;
            }
            Err(e) => {
                error!(
                    "Target '{}' failed during {}: {}",
                    target,
                    e.phase(),
                    e
                );
                summary.failed += 1;
            }
        }
    }

    info!(
        "Run complete: {}/{} targets succeeded",
        summary.succeeded, summary.targets
    );
    summary
}

/// Harvest and persist one target.
///
/// Acquires a session, navigates, runs the extraction engine to
/// convergence, and hands the batch to the store writer. The session is
/// closed on success and on failure alike. If the harvest failed but
/// accumulated records, those are persisted before the error is returned;
/// losing partially-extracted work is avoidable and avoided.
pub async fn run_target<P, S>(
    config: &HarvestConfig,
    provider: &P,
    store: &S,
    target: &str,
) -> Result<usize, HarvestError>
where
    P: SessionProvider,
    S: BucketStore + ?Sized,
{
    let url = target_url(target, config.source_domain())?;
    info!("Visiting {}", url);

    let session = provider.open(target).await.map_err(|fault| {
        HarvestError::Session {
            message: format!("failed to open session: {fault}"),
            partial: Vec::new(),
        }
    })?;

    let outcome = drive(&session, config, &url).await;
    provider.close(session).await;

    match outcome {
        Ok(events) => {
            let count = events.len();
            let key = write_batch(store, target, events).await?;
            info!("Wrote {} events for '{}' under key '{}'", count, target, key);
            Ok(count)
        }
        Err(mut err) if err.has_partial() => {
            let partial = err.take_partial();
            if !partial.is_empty() {
                warn!(
                    "Persisting {} partially-extracted events for '{}' despite failure",
                    partial.len(),
                    target
                );
                // The harvest error stays the reported root cause even if
                // the salvage write fails too
                if let Err(storage_err) = write_batch(store, target, partial).await {
                    error!(
                        "Failed to persist partial batch for '{}': {}",
                        target, storage_err
                    );
                }
            }
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Navigate, wait for the initial load, and run the engine.
async fn drive<S: PageSession>(
    session: &S,
    config: &HarvestConfig,
    url: &str,
) -> Result<HarvestBatch, HarvestError> {
    session.navigate(url).await.map_err(|fault| {
        HarvestError::Session {
            message: format!("navigation failed: {fault}"),
            partial: Vec::new(),
        }
    })?;
    session
        .wait_until_loaded(config.load_timeout())
        .await
        .map_err(|fault| HarvestError::Session {
            message: format!("page load wait failed: {fault}"),
            partial: Vec::new(),
        })?;
    harvest_page(session, config).await
}
