//! Content fetching: cache, rendered attempt, static fallback, sanitise.
//!
//! ```text
//! cache hit ───────────────────────────────────────────────▶ return
//! miss ─▶ rendered (browser) ─ok─┐
//!           │ any error/timeout  ├─▶ sanitise ─▶ cache.put ─▶ return
//!           └──▶ static (GET) ─ok┘
//! ```
//!
//! The rendered strategy is optional (no browser configured, or disabled).
//! Its failure is never fatal on its own; only a failing static fetch is.

use crate::cache::ContentCache;
use crate::error::Url2PdfError;
use crate::output::FetchOrigin;
use crate::pipeline::sanitize::sanitize;
use crate::pipeline::validate::TargetUrl;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One way of retrieving a page's HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Which strategy this is, for stats and logs.
    fn origin(&self) -> FetchOrigin;

    /// Raw (unsanitised) HTML of `url`.
    async fn fetch_html(&self, url: &TargetUrl) -> Result<String, Url2PdfError>;
}

/// Sanitised markup plus where it came from.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub html: String,
    pub origin: FetchOrigin,
}

/// Orchestrates the two fetch strategies around the shared cache.
pub struct Fetcher {
    cache: Arc<ContentCache>,
    rendered: Option<Arc<dyn PageSource>>,
    fallback: Arc<dyn PageSource>,
}

impl Fetcher {
    pub fn new(
        cache: Arc<ContentCache>,
        rendered: Option<Arc<dyn PageSource>>,
        fallback: Arc<dyn PageSource>,
    ) -> Self {
        Self {
            cache,
            rendered,
            fallback,
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Sanitised HTML for `url`.
    ///
    /// # Errors
    /// The static strategy's error (`FetchFailed` or `FetchTimeout`) when
    /// every strategy failed, or `FetchFailed` when the page came back empty.
    pub async fn fetch(&self, url: &TargetUrl) -> Result<FetchedDocument, Url2PdfError> {
        if let Some(html) = self.cache.get(url.as_str()) {
            info!("Serving {} from cache", url);
            return Ok(FetchedDocument {
                html,
                origin: FetchOrigin::Cache,
            });
        }

        let (raw, origin) = self.fetch_uncached(url).await?;
        if raw.trim().is_empty() {
            return Err(Url2PdfError::FetchFailed {
                url: url.to_string(),
                reason: "No content retrieved from URL".into(),
            });
        }

        let html = sanitize(&raw);
        debug!(
            "Fetched {} bytes via {}, {} after sanitising",
            raw.len(),
            origin,
            html.len()
        );
        self.cache.put(url.as_str(), html.clone());
        Ok(FetchedDocument { html, origin })
    }

    async fn fetch_uncached(&self, url: &TargetUrl) -> Result<(String, FetchOrigin), Url2PdfError> {
        if let Some(rendered) = &self.rendered {
            match rendered.fetch_html(url).await {
                Ok(html) if !html.trim().is_empty() => return Ok((html, rendered.origin())),
                Ok(_) => warn!("Rendered fetch of {} returned no content, falling back", url),
                Err(e) => warn!("Rendered fetch failed ({}), falling back to static fetch", e),
            }
        }
        let html = self.fallback.fetch_html(url).await?;
        Ok((html, self.fallback.origin()))
    }
}
