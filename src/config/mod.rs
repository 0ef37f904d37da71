//! Configuration for harvest runs
//!
//! `HarvestConfig` carries every tunable of the run loop, the extraction
//! engine, and the store: where the target list lives, which domain the
//! targets are subdomains of, and the timing knobs of the convergence loop.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settle pause after each scroll.
///
/// Infinite-scroll pages load new content asynchronously after the scroll
/// position reaches the bottom. This is a heuristic delay, not an
/// event-driven wait: there is no load event to hook once the initial
/// navigation has completed. Two seconds is enough for the reference site
/// on an ordinary connection; lower it in tests with a fake session.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(2);

/// Default wait for the initial page load (`document.readyState`).
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the event container to appear in the DOM.
pub const DEFAULT_ELEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on scroll cycles before giving up on convergence.
///
/// Content growth halting bounds the loop on well-behaved pages, but a
/// page that injects ads below the fold can grow forever. The cap turns
/// that into a `ConvergenceTimeout` instead of an infinite loop.
pub const DEFAULT_MAX_SCROLL_CYCLES: u32 = 60;

/// Configuration for a harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Newline-delimited target list, one subdomain label per line.
    pub(crate) queries_file: PathBuf,

    /// Domain the targets are subdomain labels of: `https://{target}.{domain}/`.
    pub(crate) source_domain: String,

    /// SQLite database file for the bucketed store.
    pub(crate) database_path: PathBuf,

    /// Pause after each scroll to let asynchronous content load.
    pub(crate) settle_interval: Duration,

    /// Maximum wait for the initial page load to complete.
    pub(crate) load_timeout: Duration,

    /// Maximum wait for the event container to appear.
    pub(crate) element_wait_timeout: Duration,

    /// Safety cap on scroll cycles per target.
    pub(crate) max_scroll_cycles: u32,

    /// Run the browser headless.
    pub(crate) headless: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            queries_file: PathBuf::from("countries.txt"),
            source_domain: "liveuamap.com".to_string(),
            database_path: PathBuf::from("./harvest.sqlite"),
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            element_wait_timeout: DEFAULT_ELEMENT_WAIT_TIMEOUT,
            max_scroll_cycles: DEFAULT_MAX_SCROLL_CYCLES,
            headless: true,
        }
    }
}

impl HarvestConfig {
    #[must_use]
    pub fn with_queries_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.queries_file = path.into();
        self
    }

    #[must_use]
    pub fn with_source_domain(mut self, domain: impl Into<String>) -> Self {
        self.source_domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Override the settle pause between scroll and re-query.
    ///
    /// Tests inject a zero interval so the convergence loop runs without
    /// real time passing.
    #[must_use]
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_element_wait_timeout(mut self, timeout: Duration) -> Self {
        self.element_wait_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_scroll_cycles(mut self, cycles: u32) -> Self {
        self.max_scroll_cycles = cycles;
        self
    }

    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn queries_file(&self) -> &Path {
        &self.queries_file
    }

    #[must_use]
    pub fn source_domain(&self) -> &str {
        &self.source_domain
    }

    #[must_use]
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    #[must_use]
    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    #[must_use]
    pub fn element_wait_timeout(&self) -> Duration {
        self.element_wait_timeout
    }

    #[must_use]
    pub fn max_scroll_cycles(&self) -> u32 {
        self.max_scroll_cycles
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_site() {
        let config = HarvestConfig::default();
        assert_eq!(config.source_domain(), "liveuamap.com");
        assert_eq!(config.queries_file(), Path::new("countries.txt"));
        assert_eq!(config.settle_interval(), DEFAULT_SETTLE_INTERVAL);
        assert!(config.headless());
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = HarvestConfig::default()
            .with_source_domain("example.org")
            .with_settle_interval(Duration::ZERO)
            .with_max_scroll_cycles(5)
            .with_headless(false);
        assert_eq!(config.source_domain(), "example.org");
        assert_eq!(config.settle_interval(), Duration::ZERO);
        assert_eq!(config.max_scroll_cycles(), 5);
        assert!(!config.headless());
    }
}
