//! Target list loading
//!
//! Targets come from a newline-delimited flat file, one subdomain label
//! per line. Blank and whitespace-only lines are skipped. A missing file
//! is a reported condition, not a crash; the run loop turns it into an
//! empty run.

use std::path::Path;
use tracing::info;

use crate::error::HarvestError;

/// Load the target list from `path`.
pub async fn load_targets(path: &Path) -> Result<Vec<String>, HarvestError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        HarvestError::Configuration(format!(
            "query source '{}' is unreadable: {}",
            path.display(),
            e
        ))
    })?;

    let targets: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    info!("Loaded {} targets from {}", targets.len(), path.display());
    Ok(targets)
}
