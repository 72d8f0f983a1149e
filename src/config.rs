//! Configuration types for URL-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`] or loaded from `URL2PDF_*` environment
//! variables with [`ConversionConfig::from_env`]. Keeping every knob in one
//! struct makes it trivial to share configs across threads, serialise them for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! The document look (font, margins) lives in a separate [`RenderConfig`]
//! that is built once per process and handed to the assembler by reference.

use crate::error::Url2PdfError;
use crate::pipeline::validate::Cidr;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Desktop user agent sent by the static fetch and image downloads.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Configuration for a URL-to-PDF conversion.
///
/// # Example
/// ```rust
/// use edgequake_url2pdf::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .fetch_timeout_secs(15)
///     .cache_enabled(false)
///     .build()
///     .unwrap();
/// assert!(!config.cache_enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Maximum request payload size in bytes. Default: 10 MiB.
    pub max_input_bytes: usize,

    /// Static-fetch timeout in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Try the headless-browser strategy before the static fetch. Default: true.
    ///
    /// Pages that populate their tables from script only come out complete
    /// through the browser. Disable on hosts without a Chrome binary to skip
    /// the (failing) launch on every request.
    pub use_browser: bool,

    /// Timeouts and delays for the rendered fetch.
    pub browser: BrowserTimeouts,

    /// Explicit Chrome/Chromium binary. `None` lets the launcher search.
    pub chrome_path: Option<PathBuf>,

    /// Run Chrome with its sandbox. Default: true.
    pub browser_sandbox: bool,

    /// Per-image download timeout in seconds. Default: 10.
    pub image_timeout_secs: u64,

    /// Image size ceiling in bytes. Default: 5 MiB.
    pub max_image_bytes: u64,

    /// Content cache TTL in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Global cache switch. Default: true.
    pub cache_enabled: bool,

    /// Accepted URL schemes. Default: `http`, `https`.
    pub allowed_schemes: Vec<String>,

    /// Hosts rejected by exact (case-insensitive) match.
    pub blocked_hosts: Vec<String>,

    /// CIDR ranges rejected for literal IP hosts.
    pub blocked_cidrs: Vec<String>,

    /// Substrings rejected inside domain names.
    pub blocked_host_patterns: Vec<String>,

    /// User agent for static fetches and image downloads.
    pub user_agent: String,

    /// Document look.
    pub render: RenderConfig,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 10 * 1024 * 1024,
            fetch_timeout_secs: 30,
            use_browser: true,
            browser: BrowserTimeouts::default(),
            chrome_path: None,
            browser_sandbox: true,
            image_timeout_secs: 10,
            max_image_bytes: 5 * 1024 * 1024,
            cache_ttl_secs: 3600,
            cache_enabled: true,
            allowed_schemes: strings(&["http", "https"]),
            blocked_hosts: strings(&[
                "localhost",
                "127.0.0.1",
                "0.0.0.0",
                "::1",
                "169.254.169.254",
            ]),
            blocked_cidrs: strings(&["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fc00::/7"]),
            blocked_host_patterns: strings(&[
                "localhost",
                "127.",
                "192.168.",
                "10.",
                "172.",
                "169.254.169.254",
            ]),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            render: RenderConfig::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Timeouts and delays driving the rendered fetch, in milliseconds.
///
/// The rendered fetch is a sequence of heuristics rather than one wait:
/// initial load, network idle, a table-row selector, a settle delay, then a
/// scroll down and back up. Each step has its own bound so a page that never
/// goes idle still gets captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserTimeouts {
    /// Initial navigation bound. Default: 30 000.
    pub navigation_ms: u64,
    /// Best-effort network-idle wait. Default: 10 000.
    pub network_idle_ms: u64,
    /// Wait for a non-header table row. Default: 10 000.
    pub table_selector_ms: u64,
    /// Extra delay when no table row ever appears. Default: 5 000.
    pub table_fallback_ms: u64,
    /// Fixed settle delay after the heuristics. Default: 2 000.
    pub settle_ms: u64,
    /// Delay after each scroll. Default: 1 000.
    pub scroll_ms: u64,
}

impl Default for BrowserTimeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            network_idle_ms: 10_000,
            table_selector_ms: 10_000,
            table_fallback_ms: 5_000,
            settle_ms: 2_000,
            scroll_ms: 1_000,
        }
    }
}

impl BrowserTimeouts {
    /// Upper bound for one whole rendered attempt, including browser launch.
    pub fn attempt_budget(&self) -> Duration {
        let steps = [
            self.navigation_ms,
            self.network_idle_ms,
            self.table_selector_ms.max(self.table_fallback_ms),
            self.settle_ms,
            self.scroll_ms.saturating_mul(2),
        ]
        .into_iter()
        .fold(0u64, u64::saturating_add);
        // Launch and DOM capture are not covered by any single step.
        Duration::from_millis(steps.saturating_add(15_000))
    }
}

/// Render configuration: the fixed look applied to every document.
///
/// Constructed once per process and passed by reference into the assembler
/// instead of relying on a global "fonts registered" flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// CSS font-family list. Default: `Helvetica, Arial, sans-serif`.
    pub font_family: String,
    /// Body font size. Default: `12pt`.
    pub font_size: String,
    /// Body line height. Default: `1.6`.
    pub line_height: String,
    /// Page margin in centimetres. Default: 2.0.
    pub page_margin_cm: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_family: "Helvetica, Arial, sans-serif".to_string(),
            font_size: "12pt".to_string(),
            line_height: "1.6".to_string(),
            page_margin_cm: 2.0,
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// A builder seeded with this configuration.
    pub fn to_builder(&self) -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: self.clone(),
        }
    }

    /// Defaults overridden by `URL2PDF_*` environment variables.
    pub fn from_env() -> Result<Self, Url2PdfError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `URL2PDF_*` key. Unparseable values are an error, not ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Url2PdfError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("URL2PDF_MAX_REQUEST_SIZE") {
            c.max_input_bytes = parse_num("URL2PDF_MAX_REQUEST_SIZE", &v)?;
        }
        if let Some(v) = get("URL2PDF_FETCH_TIMEOUT") {
            c.fetch_timeout_secs = parse_num("URL2PDF_FETCH_TIMEOUT", &v)?;
        }
        if let Some(v) = get("URL2PDF_NAVIGATION_TIMEOUT_MS") {
            c.browser.navigation_ms = parse_num("URL2PDF_NAVIGATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("URL2PDF_NETWORK_IDLE_TIMEOUT_MS") {
            c.browser.network_idle_ms = parse_num("URL2PDF_NETWORK_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("URL2PDF_TABLE_TIMEOUT_MS") {
            c.browser.table_selector_ms = parse_num("URL2PDF_TABLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("URL2PDF_SETTLE_MS") {
            c.browser.settle_ms = parse_num("URL2PDF_SETTLE_MS", &v)?;
        }
        if let Some(v) = get("URL2PDF_SCROLL_WAIT_MS") {
            c.browser.scroll_ms = parse_num("URL2PDF_SCROLL_WAIT_MS", &v)?;
        }
        if let Some(v) = get("URL2PDF_IMAGE_TIMEOUT") {
            c.image_timeout_secs = parse_num("URL2PDF_IMAGE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("URL2PDF_MAX_IMAGE_SIZE") {
            c.max_image_bytes = parse_num("URL2PDF_MAX_IMAGE_SIZE", &v)?;
        }
        if let Some(v) = get("URL2PDF_CACHE_TTL") {
            c.cache_ttl_secs = parse_num("URL2PDF_CACHE_TTL", &v)?;
        }
        if let Some(v) = get("URL2PDF_ENABLE_CACHE") {
            c.cache_enabled = parse_bool("URL2PDF_ENABLE_CACHE", &v)?;
        }
        if let Some(v) = get("URL2PDF_USE_BROWSER") {
            c.use_browser = parse_bool("URL2PDF_USE_BROWSER", &v)?;
        }
        if let Some(v) = get("URL2PDF_ALLOWED_SCHEMES") {
            c.allowed_schemes = parse_list(&v);
        }
        if let Some(v) = get("URL2PDF_BLOCKED_HOSTS") {
            c.blocked_hosts = parse_list(&v);
        }
        if let Some(v) = get("URL2PDF_BLOCKED_CIDRS") {
            c.blocked_cidrs = parse_list(&v);
        }
        if let Some(v) = get("URL2PDF_CHROME_PATH") {
            c.chrome_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("URL2PDF_PAGE_MARGIN") {
            c.render.page_margin_cm = parse_margin(&v)?;
        }
        if let Some(v) = get("URL2PDF_FONT_FAMILY") {
            c.render.font_family = v;
        }
        if let Some(v) = get("URL2PDF_FONT_SIZE") {
            c.render.font_size = v;
        }
        if let Some(v) = get("URL2PDF_LINE_HEIGHT") {
            c.render.line_height = v;
        }

        ConversionConfigBuilder { config: c }.build()
    }

    pub(crate) fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub(crate) fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Url2PdfError> {
    value
        .trim()
        .parse()
        .map_err(|_| Url2PdfError::InvalidConfig(format!("{key}: '{value}' is not a number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Url2PdfError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Url2PdfError::InvalidConfig(format!(
            "{key}: '{value}' is not a boolean"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts `2cm`, `20mm`, `1in` or a bare number of centimetres.
fn parse_margin(value: &str) -> Result<f64, Url2PdfError> {
    let v = value.trim().to_ascii_lowercase();
    let (num, factor) = if let Some(n) = v.strip_suffix("cm") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("mm") {
        (n, 0.1)
    } else if let Some(n) = v.strip_suffix("in") {
        (n, 2.54)
    } else {
        (v.as_str(), 1.0)
    };
    num.trim()
        .parse::<f64>()
        .ok()
        .filter(|m| m.is_finite() && *m >= 0.0)
        .map(|m| m * factor)
        .ok_or_else(|| {
            Url2PdfError::InvalidConfig(format!("URL2PDF_PAGE_MARGIN: '{value}' is not a length"))
        })
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_input_bytes(mut self, n: usize) -> Self {
        self.config.max_input_bytes = n.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn use_browser(mut self, v: bool) -> Self {
        self.config.use_browser = v;
        self
    }

    pub fn browser_timeouts(mut self, t: BrowserTimeouts) -> Self {
        self.config.browser = t;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn browser_sandbox(mut self, v: bool) -> Self {
        self.config.browser_sandbox = v;
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs.max(1);
        self
    }

    pub fn max_image_bytes(mut self, n: u64) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn cache_enabled(mut self, v: bool) -> Self {
        self.config.cache_enabled = v;
        self
    }

    pub fn allowed_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    pub fn blocked_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.blocked_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn blocked_cidrs<I, S>(mut self, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.blocked_cidrs = cidrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn blocked_host_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.blocked_host_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn render(mut self, render: RenderConfig) -> Self {
        self.config.render = render;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Url2PdfError> {
        let c = &self.config;
        if c.allowed_schemes.is_empty() {
            return Err(Url2PdfError::InvalidConfig(
                "At least one URL scheme must be allowed".into(),
            ));
        }
        if c.fetch_timeout_secs == 0 || c.image_timeout_secs == 0 {
            return Err(Url2PdfError::InvalidConfig(
                "Fetch and image timeouts must be ≥ 1s".into(),
            ));
        }
        if c.browser.navigation_ms == 0 {
            return Err(Url2PdfError::InvalidConfig(
                "Navigation timeout must be > 0".into(),
            ));
        }
        if c.max_image_bytes == 0 {
            return Err(Url2PdfError::InvalidConfig(
                "Maximum image size must be > 0".into(),
            ));
        }
        for entry in &c.blocked_cidrs {
            if Cidr::parse(entry).is_none() {
                return Err(Url2PdfError::InvalidConfig(format!(
                    "Invalid blocked CIDR range '{entry}'"
                )));
            }
        }
        if !c.render.page_margin_cm.is_finite() || c.render.page_margin_cm < 0.0 {
            return Err(Url2PdfError::InvalidConfig(format!(
                "Page margin must be a non-negative length, got {}",
                c.render.page_margin_cm
            )));
        }
        Ok(self.config)
    }
}
