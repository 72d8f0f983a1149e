//! Conversion entry points: the document assembler.
//!
//! ## Why a `Converter`?
//!
//! The content cache is the only state shared between requests. A long-lived
//! host builds one [`Converter`] and calls it for every request so the cache
//! actually gets hits. The free functions ([`convert`], [`convert_sync`],
//! [`convert_to_file`]) build a throwaway converter per call, which is
//! simpler for one-shot use but never serves from cache.
//!
//! Every stage behind the converter is a trait object, so hosts and tests
//! can swap the browser, the HTTP client or the print engine through
//! [`ConverterBuilder`].

use crate::cache::ContentCache;
use crate::config::ConversionConfig;
use crate::error::Url2PdfError;
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::browser::BrowserSource;
use crate::pipeline::fetch::{Fetcher, PageSource};
use crate::pipeline::http::{HttpImageSource, StaticSource};
use crate::pipeline::render::{self, ChromeRenderer, DocumentRenderer};
use crate::pipeline::resolve::{ImageSource, ResolverLimits, ResourceResolver};
use crate::pipeline::validate::{TargetUrl, UrlPolicy};
use crate::pipeline::{images, input};
use crate::template;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Short id that tells log lines of concurrent requests apart.
fn next_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    format!("{:x}-{:04x}", millis, seq & 0xffff)
}

/// Reusable URL-to-PDF converter.
pub struct Converter {
    config: ConversionConfig,
    policy: UrlPolicy,
    fetcher: Fetcher,
    images: Arc<dyn ImageSource>,
    renderer: Arc<dyn DocumentRenderer>,
    temp_dir: Option<PathBuf>,
}

impl Converter {
    /// Converter with the default stages: headless Chrome, reqwest and a
    /// fresh cache.
    ///
    /// Must be called inside a tokio runtime; image downloads re-enter it.
    pub fn new(config: ConversionConfig) -> Result<Self, Url2PdfError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ConversionConfig) -> ConverterBuilder {
        ConverterBuilder {
            config,
            cache: None,
            rendered: None,
            fallback: None,
            images: None,
            renderer: None,
            temp_dir: None,
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        self.fetcher.cache()
    }

    /// Validate `url` without touching the network.
    pub fn check(&self, url: &str) -> Result<TargetUrl, Url2PdfError> {
        let raw = input::read_url(url.as_bytes(), None, self.config.max_input_bytes)?;
        self.policy.validate(&raw).map_err(|r| r.into_error(&raw))
    }

    /// Convert the page at `url` to PDF.
    pub async fn convert_url(&self, url: &str) -> Result<ConversionOutput, Url2PdfError> {
        self.convert_payload(url.as_bytes(), None).await
    }

    /// Convert a raw request payload holding one URL.
    ///
    /// `declared_charset` is the charset the caller announced for the
    /// payload, if any (e.g. from the request's `Content-Type`).
    ///
    /// # Errors
    /// Input errors and policy rejections happen before any network access.
    /// After that: `FetchFailed`/`FetchTimeout` when no strategy produced
    /// markup, `RenderFailed` when the print engine signals an error.
    pub async fn convert_payload(
        &self,
        payload: &[u8],
        declared_charset: Option<&str>,
    ) -> Result<ConversionOutput, Url2PdfError> {
        let span = info_span!("convert", request_id = %next_request_id());
        self.assemble(payload, declared_charset).instrument(span).await
    }

    async fn assemble(
        &self,
        payload: &[u8],
        declared_charset: Option<&str>,
    ) -> Result<ConversionOutput, Url2PdfError> {
        let total_start = Instant::now();

        // ── Step 1: Decode input ─────────────────────────────────────────
        let raw = input::read_url(payload, declared_charset, self.config.max_input_bytes)?;
        info!("Starting conversion: {}", raw);

        // ── Step 2: Validate (fail closed, before any network access) ────
        let target = self.policy.validate(&raw).map_err(|reason| {
            warn!("Rejected URL {}: {}", raw, reason);
            reason.into_error(&raw)
        })?;

        // ── Step 3: Fetch + sanitise ─────────────────────────────────────
        let fetch_start = Instant::now();
        let fetched = self.fetcher.fetch(&target).await?;
        let fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;
        debug!(
            "Fetched {} bytes via {} in {}ms",
            fetched.html.len(),
            fetched.origin,
            fetch_duration_ms
        );

        // ── Step 4: Absolute image URLs ──────────────────────────────────
        let html = images::absolutize_images(&fetched.html, target.as_url());

        // ── Step 5: Style template ───────────────────────────────────────
        let markup = template::prepare_document(&html, &self.config.render);
        let html_bytes = markup.len();

        // ── Step 6: Render with a fresh resolver ─────────────────────────
        let render_start = Instant::now();
        let report =
            render::render_document(Arc::clone(&self.renderer), markup, self.resolver(&target))
                .await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        debug!(
            "Render finished in {}ms, {} temp file(s) removed",
            render_duration_ms, report.files_removed
        );

        // ── Step 7: Collect outcome ──────────────────────────────────────
        let outcome = report.outcome;
        for warning in &outcome.warnings {
            warn!("Renderer warning: {}", warning);
        }
        if let Some(message) = outcome.error {
            return Err(Url2PdfError::RenderFailed { message });
        }
        if outcome.pdf.is_empty() {
            return Err(Url2PdfError::Processing(
                "Renderer produced an empty document".into(),
            ));
        }

        let stats = ConversionStats {
            origin: Some(fetched.origin),
            html_bytes,
            pdf_bytes: outcome.pdf.len(),
            images_resolved: report.images_resolved,
            images_failed: report.images_failed,
            warnings: outcome.warnings,
            fetch_duration_ms,
            render_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Conversion complete: {} bytes, {} image(s), {}ms total",
            stats.pdf_bytes, stats.images_resolved, stats.total_duration_ms
        );

        Ok(ConversionOutput {
            pdf: outcome.pdf,
            url: target.to_string(),
            stats,
        })
    }

    fn resolver(&self, target: &TargetUrl) -> ResourceResolver {
        let limits = ResolverLimits {
            timeout: self.config.image_timeout(),
            max_bytes: self.config.max_image_bytes,
        };
        let resolver = ResourceResolver::new(
            target.as_url().clone(),
            limits,
            self.policy.clone(),
            Arc::clone(&self.images),
        );
        match &self.temp_dir {
            Some(dir) => resolver.with_temp_dir(dir),
            None => resolver,
        }
    }

    /// Drop every expired cache entry now. Returns how many were removed.
    pub fn sweep_cache(&self) -> usize {
        let removed = self.cache().sweep();
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Sweep the cache every `interval` on the current runtime until the
    /// returned handle is aborted.
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self.cache());
        let period = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Swept {} expired cache entries", removed);
                }
            }
        })
    }
}

/// Assembles a [`Converter`], defaulting every stage that is not set.
pub struct ConverterBuilder {
    config: ConversionConfig,
    cache: Option<Arc<ContentCache>>,
    rendered: Option<Arc<dyn PageSource>>,
    fallback: Option<Arc<dyn PageSource>>,
    images: Option<Arc<dyn ImageSource>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    temp_dir: Option<PathBuf>,
}

impl ConverterBuilder {
    /// Share a cache with other converters.
    pub fn cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Rendered strategy. Ignored when `use_browser` is off.
    pub fn rendered_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.rendered = Some(source);
        self
    }

    /// Static (fallback) strategy.
    pub fn static_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub fn image_source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.images = Some(source);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Directory for materialised images (default: the system temp dir).
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Converter, Url2PdfError> {
        let config = self.config;
        let policy = UrlPolicy::from_config(&config)?;

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(ContentCache::new(config.cache_ttl(), config.cache_enabled))
        });

        let rendered: Option<Arc<dyn PageSource>> = match (config.use_browser, self.rendered) {
            (false, _) => None,
            (true, Some(source)) => Some(source),
            (true, None) => Some(Arc::new(BrowserSource::new(&config))),
        };

        let fallback: Arc<dyn PageSource> = match self.fallback {
            Some(source) => source,
            None => Arc::new(StaticSource::new(&config, &policy)?),
        };

        let images: Arc<dyn ImageSource> = match self.images {
            Some(source) => source,
            None => {
                let handle = tokio::runtime::Handle::try_current().map_err(|e| {
                    Url2PdfError::Internal(format!("No tokio runtime for image downloads: {}", e))
                })?;
                Arc::new(HttpImageSource::new(&config, &policy, handle)?)
            }
        };

        let renderer: Arc<dyn DocumentRenderer> = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(ChromeRenderer::new(&config)),
        };

        Ok(Converter {
            fetcher: Fetcher::new(cache, rendered, fallback),
            policy,
            images,
            renderer,
            temp_dir: self.temp_dir,
            config,
        })
    }
}

/// Convert the page at `url` to PDF with a one-shot [`Converter`].
///
/// # Errors
/// See [`Converter::convert_payload`].
pub async fn convert(
    url: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Url2PdfError> {
    Converter::new(config.clone())?
        .convert_url(url.as_ref())
        .await
}

/// Convert a page and write the PDF directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Url2PdfError> {
    let output = convert(url, config).await?;
    write_atomic(output_path.as_ref(), &output.pdf).await?;
    Ok(output.stats)
}

/// Write `bytes` to `path` through a sibling temp file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Url2PdfError> {
    let fail = |e| Url2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(fail(e));
    }
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    url: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Url2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Url2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(url, config))
}

/// Validate `url` against the safety policy without fetching anything.
pub fn check_url(url: impl AsRef<str>, config: &ConversionConfig) -> Result<TargetUrl, Url2PdfError> {
    let url = url.as_ref();
    let raw = input::read_url(url.as_bytes(), None, config.max_input_bytes)?;
    let policy = UrlPolicy::from_config(config)?;
    policy.validate(&raw).map_err(|r| r.into_error(&raw))
}
