//! Chromium-backed implementation of the session capability
//!
//! Launches one browser per target, tracks the CDP event-handler task,
//! and cleans up the temp profile directory when the session closes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use super::{PageElement, PageSession, SessionFault, SessionProvider};
use crate::config::HarvestConfig;

/// Poll interval while waiting for `document.readyState`.
const READY_STATE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A launched browser and its event-handler task.
///
/// The handler MUST be aborted when the browser goes away, otherwise the
/// task runs forever after the Chrome process exits. `Drop` covers the
/// paths that skip an explicit [`BrowserHandle::shutdown`].
pub struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserHandle {
    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser process and remove the temp profile directory.
    ///
    /// The directory is removed only after `browser.wait()` completes so
    /// Chrome has released its file handles.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.cleanup_temp_dir();
    }

    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            debug!("Removing browser profile directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to remove profile directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop kills the Chrome process if shutdown() was skipped
        if self.user_data_dir.is_some() {
            warn!("BrowserHandle dropped without shutdown, removing profile dir in Drop");
            self.cleanup_temp_dir();
        }
    }
}

/// Find a Chrome/Chromium executable on the system.
///
/// `CHROMIUM_PATH` overrides the search. Otherwise common install paths
/// are probed, then `which` on Unix.
async fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("Found browser via 'which': {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(anyhow::anyhow!("Chrome/Chromium executable not found"))
}

/// Download a managed Chromium into the user cache directory.
async fn download_managed_browser() -> Result<PathBuf> {
    info!("No local browser found, downloading managed Chromium...");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("scrollharvest")
        .join("chromium");
    std::fs::create_dir_all(&cache_dir).context("Failed to create browser cache directory")?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("Failed to build fetcher options")?,
    );
    let revision_info = fetcher.fetch().await.context("Failed to fetch browser")?;

    info!(
        "Downloaded Chromium to: {}",
        revision_info.folder_path.display()
    );
    Ok(revision_info.executable_path)
}

/// Launch a browser with a unique temp profile and a tracked handler task.
pub async fn launch_browser(headless: bool) -> Result<BrowserHandle> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    let user_data_dir = std::env::temp_dir().join(format!(
        "scrollharvest_chrome_{}_{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ));
    std::fs::create_dir_all(&user_data_dir).context("Failed to create user data directory")?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1920, 1080)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(chrome_path);

    if headless {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    let browser_config = config_builder
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let msg = e.to_string();
                // Chrome sends CDP events chromiumoxide doesn't recognize;
                // those deserialization misses are noise, not faults.
                if msg.contains("data did not match any variant of untagged enum Message") {
                    trace!("Suppressed benign CDP deserialization error: {}", msg);
                } else {
                    tracing::error!("Browser handler error: {:?}", e);
                }
            }
        }
        debug!("Browser event handler task completed");
    });

    Ok(BrowserHandle {
        browser,
        handler: handler_task,
        user_data_dir: Some(user_data_dir),
    })
}

/// A chromiumoxide-backed page session owning its browser.
pub struct ChromeSession {
    handle: BrowserHandle,
    page: Page,
}

impl ChromeSession {
    /// Launch a browser and open one blank page for this session.
    pub async fn launch(headless: bool) -> Result<Self> {
        let handle = launch_browser(headless).await?;
        let page = handle
            .browser()
            .new_page("about:blank")
            .await
            .context("Failed to create blank page")?;
        Ok(Self { handle, page })
    }

    /// Close the page's browser and clean up its profile directory.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    type Element = ChromeElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionFault> {
        self.page
            .goto(url)
            .await
            .map_err(SessionFault::from_err)?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(SessionFault::from_err)?;
        Ok(())
    }

    async fn wait_until_loaded(&self, timeout: Duration) -> Result<(), SessionFault> {
        let start = Instant::now();
        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .map_err(SessionFault::from_err)?
                .into_value()
                .map_err(SessionFault::from_err)?;
            if state == "complete" {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(SessionFault::new(format!(
                    "page did not finish loading within {timeout:?} (readyState={state})"
                )));
            }
            tokio::time::sleep(READY_STATE_POLL_INTERVAL).await;
        }
    }

    async fn scroll_to_bottom(&self) -> Result<(), SessionFault> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(SessionFault::from_err)?;
        Ok(())
    }

    async fn content_height(&self) -> Result<i64, SessionFault> {
        self.page
            .evaluate("document.body.scrollHeight")
            .await
            .map_err(SessionFault::from_err)?
            .into_value()
            .map_err(SessionFault::from_err)
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<ChromeElement>, SessionFault> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(SessionFault::from_err)?;
        Ok(elements.into_iter().map(ChromeElement).collect())
    }

    async fn find_one(&self, selector: &str) -> Result<Option<ChromeElement>, SessionFault> {
        // chromiumoxide reports "no match" as an error; only that shape is
        // absence, anything else is a dead or disconnected session
        match self.page.find_element(selector).await {
            Ok(element) => Ok(Some(ChromeElement(element))),
            Err(CdpError::NotFound) => Ok(None),
            Err(e) => Err(SessionFault::from_err(e)),
        }
    }
}

/// Element handle wrapping `chromiumoxide::element::Element`.
pub struct ChromeElement(Element);

#[async_trait]
impl PageElement for ChromeElement {
    async fn text(&self, selector: &str) -> Result<Option<String>, SessionFault> {
        match self.0.find_element(selector).await {
            Ok(child) => Ok(child.inner_text().await.ok().flatten()),
            Err(CdpError::NotFound) => Ok(None),
            Err(e) => Err(SessionFault::from_err(e)),
        }
    }

    async fn attribute(
        &self,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, SessionFault> {
        match self.0.find_element(selector).await {
            Ok(child) => Ok(child.attribute(attr).await.ok().flatten()),
            Err(CdpError::NotFound) => Ok(None),
            Err(e) => Err(SessionFault::from_err(e)),
        }
    }
}

/// Session provider launching one fresh browser per target.
///
/// A crashed browser from one target can never poison the next.
#[derive(Clone)]
pub struct ChromeSessionProvider {
    config: HarvestConfig,
}

impl ChromeSessionProvider {
    #[must_use]
    pub fn new(config: HarvestConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    type Session = ChromeSession;

    async fn open(&self, target: &str) -> Result<ChromeSession, SessionFault> {
        info!("Launching browser session for target '{}'", target);
        ChromeSession::launch(self.config.headless())
            .await
            .map_err(SessionFault::from_err)
    }

    async fn close(&self, session: ChromeSession) {
        session.shutdown().await;
    }
}
