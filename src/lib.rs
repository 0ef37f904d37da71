pub mod config;
pub mod error;
pub mod extract;
pub mod queries;
pub mod runner;
pub mod session;
pub mod store;

pub use config::HarvestConfig;
pub use error::HarvestError;
pub use extract::{EventRecord, HarvestBatch, harvest_page};
pub use runner::{RunSummary, run_all, run_target};
pub use session::{
    ChromeSession, ChromeSessionProvider, PageElement, PageSession, SessionFault, SessionProvider,
};
pub use store::{Bucket, BucketStore, MemoryBucketStore, SqliteBucketStore, write_batch};

/// Harvest every configured target into the given store, one browser
/// session per target.
///
/// Convenience entry point that wires the chromium session provider to
/// [`runner::run_all`]. Failures are isolated per target; the returned
/// summary says how many targets succeeded.
pub async fn harvest<S: BucketStore + ?Sized>(config: &HarvestConfig, store: &S) -> RunSummary {
    let provider = ChromeSessionProvider::new(config.clone());
    run_all(config, &provider, store).await
}
