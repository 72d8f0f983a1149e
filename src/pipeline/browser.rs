//! Rendered fetch: drive a headless Chrome through the completion heuristics.
//!
//! ## Why so many waits?
//!
//! Pages that fill their tables from script give no reliable "done" signal.
//! The heuristics below are each bounded and each tolerant: a page that never
//! goes idle or never shows a table row is still captured, just later.
//!
//! ```text
//! launch ─▶ navigate (bounded) ─▶ network idle (best effort)
//!        ─▶ non-header table row, else fixed delay ─▶ settle
//!        ─▶ scroll bottom, wait ─▶ scroll top, wait ─▶ capture DOM
//! ```
//!
//! ## Why spawn_blocking?
//!
//! `headless_chrome` is a blocking client. Every session runs on the blocking
//! pool and the whole attempt is bounded by [`BrowserTimeouts::attempt_budget`].
//! A session is never shared: one browser process per attempt, closed by
//! [`BrowserSession`]'s `Drop` on every exit path.

use crate::config::{BrowserTimeouts, ConversionConfig};
use crate::error::Url2PdfError;
use crate::output::FetchOrigin;
use crate::pipeline::fetch::PageSource;
use crate::pipeline::validate::TargetUrl;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Selector for a table row that is not the header row.
const TABLE_ROW_SELECTOR: &str = "table tbody tr, table tr:not(:first-child)";

/// Poll interval and quiet window for the network-idle heuristic.
const IDLE_POLL: Duration = Duration::from_millis(100);
const IDLE_QUIET: Duration = Duration::from_millis(500);

const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";
const SCROLL_BOTTOM_JS: &str = "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)";
const SCROLL_TOP_JS: &str = "window.scrollTo(0, 0)";

/// How to start Chrome.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    chrome_path: Option<PathBuf>,
    sandbox: bool,
    idle_timeout: Duration,
}

impl BrowserLauncher {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            sandbox: config.browser_sandbox,
            idle_timeout: config.browser.attempt_budget(),
        }
    }

    /// Launch a browser with one fresh tab.
    pub fn open(&self) -> Result<BrowserSession, String> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.sandbox)
            .path(self.chrome_path.clone())
            .idle_browser_timeout(self.idle_timeout)
            .build()
            .map_err(|e| format!("invalid launch options: {e}"))?;

        let browser = Browser::new(options).map_err(|e| format!("failed to launch browser: {e}"))?;
        let tab = browser
            .new_tab()
            .map_err(|e| format!("failed to create tab: {e}"))?;
        trace!("Browser session opened");
        Ok(BrowserSession { tab, _browser: browser })
    }
}

/// One browser process and its tab. Dropping it closes both.
pub struct BrowserSession {
    tab: Arc<Tab>,
    // Dropped after the tab is closed; kills the process.
    _browser: Browser,
}

impl BrowserSession {
    pub fn tab(&self) -> &Tab {
        &self.tab
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            warn!("Failed to close browser tab (process is killed anyway): {}", e);
        } else {
            trace!("Browser session closed");
        }
    }
}

/// [`PageSource`] that renders the page in headless Chrome.
pub struct BrowserSource {
    launcher: BrowserLauncher,
    timeouts: BrowserTimeouts,
}

impl BrowserSource {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            launcher: BrowserLauncher::from_config(config),
            timeouts: config.browser,
        }
    }
}

#[async_trait]
impl PageSource for BrowserSource {
    fn origin(&self) -> FetchOrigin {
        FetchOrigin::Rendered
    }

    async fn fetch_html(&self, url: &TargetUrl) -> Result<String, Url2PdfError> {
        info!("Rendered fetch: {}", url);
        let budget = self.timeouts.attempt_budget();
        let launcher = self.launcher.clone();
        let timeouts = self.timeouts;
        let target = url.as_str().to_string();

        let task = tokio::task::spawn_blocking(move || render_page(&launcher, &timeouts, &target));

        match tokio::time::timeout(budget, task).await {
            Err(_) => Err(Url2PdfError::FetchTimeout {
                url: url.to_string(),
                secs: budget.as_secs(),
            }),
            Ok(Err(join)) => Err(Url2PdfError::Internal(format!(
                "Browser task panicked: {}",
                join
            ))),
            Ok(Ok(Err(reason))) => Err(Url2PdfError::FetchFailed {
                url: url.to_string(),
                reason,
            }),
            Ok(Ok(Ok(html))) => Ok(html),
        }
    }
}

/// Blocking implementation of the rendered fetch.
fn render_page(launcher: &BrowserLauncher, t: &BrowserTimeouts, url: &str) -> Result<String, String> {
    let start = Instant::now();
    let session = launcher.open()?;
    let tab = session.tab();

    // ── Step 1: Navigate ─────────────────────────────────────────────────
    tab.set_default_timeout(Duration::from_millis(t.navigation_ms));
    tab.navigate_to(url)
        .map_err(|e| format!("navigation failed: {e}"))?
        .wait_until_navigated()
        .map_err(|e| format!("navigation did not finish: {e}"))?;
    debug!("Navigated in {:?}", start.elapsed());

    // ── Step 2: Network idle (best effort) ───────────────────────────────
    if !wait_for_network_idle(tab, Duration::from_millis(t.network_idle_ms)) {
        debug!("Network idle not reached, continuing");
    }

    // ── Step 3: Table rows, else fixed delay ─────────────────────────────
    match tab.wait_for_element_with_custom_timeout(
        TABLE_ROW_SELECTOR,
        Duration::from_millis(t.table_selector_ms),
    ) {
        Ok(_) => debug!("Table rows present"),
        Err(_) => {
            debug!("No table rows, waiting {}ms more", t.table_fallback_ms);
            std::thread::sleep(Duration::from_millis(t.table_fallback_ms));
        }
    }

    // ── Step 4: Settle ───────────────────────────────────────────────────
    std::thread::sleep(Duration::from_millis(t.settle_ms));

    // ── Step 5: Scroll for lazy content ──────────────────────────────────
    for script in [SCROLL_BOTTOM_JS, SCROLL_TOP_JS] {
        if let Err(e) = tab.evaluate(script, false) {
            debug!("Scroll failed: {}", e);
        }
        std::thread::sleep(Duration::from_millis(t.scroll_ms));
    }

    // ── Step 6: Capture ──────────────────────────────────────────────────
    let html = tab
        .get_content()
        .map_err(|e| format!("failed to read rendered DOM: {e}"))?;
    info!(
        "Rendered fetch captured {} bytes in {:?}",
        html.len(),
        start.elapsed()
    );
    Ok(html)
}

/// Poll the resource-timing count until it holds still for [`IDLE_QUIET`].
fn wait_for_network_idle(tab: &Tab, max_wait: Duration) -> bool {
    let start = Instant::now();
    let mut last_count: Option<u64> = None;
    let mut stable_since = Instant::now();

    while start.elapsed() < max_wait {
        let count = tab
            .evaluate(RESOURCE_COUNT_JS, false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_u64());

        if count.is_some() && count == last_count {
            if stable_since.elapsed() >= IDLE_QUIET {
                debug!("Network idle after {:?}", start.elapsed());
                return true;
            }
        } else {
            last_count = count;
            stable_since = Instant::now();
        }
        std::thread::sleep(IDLE_POLL);
    }
    false
}
