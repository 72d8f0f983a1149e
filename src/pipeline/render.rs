//! Document rendering: styled markup in, PDF bytes plus warnings out.
//!
//! The renderer is a black box behind [`DocumentRenderer`]. It reports
//! through a [`RenderOutcome`] the way a print engine does: bytes, a list of
//! non-fatal warnings, and an optional fatal error message. The assembler
//! decides what is fatal.
//!
//! ## Why spawn_blocking?
//!
//! Both the print engine and the image resolver block (the resolver downloads
//! images as the renderer asks for them). [`render_document`] moves the whole
//! render onto the blocking pool together with the resolver it owns, and runs
//! the resolver cleanup on that same thread before returning. A panic drops
//! the resolver during unwinding, which deletes its files as well.

use crate::config::{ConversionConfig, RenderConfig};
use crate::error::Url2PdfError;
use crate::pipeline::browser::BrowserLauncher;
use crate::pipeline::resolve::{Relation, ResourceResolver};
use headless_chrome::types::PrintToPdfOptions;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// Engine-side result of one render call.
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub pdf: Vec<u8>,
    /// Non-fatal problems (missing images, …). Logged, never escalated.
    pub warnings: Vec<String>,
    /// Fatal engine error.
    pub error: Option<String>,
}

impl RenderOutcome {
    pub fn failed(message: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            pdf: Vec::new(),
            warnings,
            error: Some(message.into()),
        }
    }
}

/// A print engine. Blocking; called from the blocking pool.
pub trait DocumentRenderer: Send + Sync {
    /// Render `markup`, asking `resolver` for every external resource.
    fn render(&self, markup: &str, resolver: &mut ResourceResolver) -> RenderOutcome;
}

/// What [`render_document`] hands back to the assembler.
#[derive(Debug)]
pub struct RenderReport {
    pub outcome: RenderOutcome,
    pub images_resolved: usize,
    pub images_failed: usize,
    pub files_removed: usize,
}

/// Run `renderer` on the blocking pool and clean up the resolver afterwards,
/// whatever the outcome.
pub async fn render_document(
    renderer: Arc<dyn DocumentRenderer>,
    markup: String,
    mut resolver: ResourceResolver,
) -> Result<RenderReport, Url2PdfError> {
    tokio::task::spawn_blocking(move || {
        let outcome = renderer.render(&markup, &mut resolver);
        let images_resolved = resolver.resolved_count();
        let images_failed = resolver.errors().len();
        let files_removed = resolver.cleanup();
        RenderReport {
            outcome,
            images_resolved,
            images_failed,
            files_removed,
        }
    })
    .await
    .map_err(|e| Url2PdfError::Internal(format!("Render task panicked: {}", e)))
}

// ── Markup preparation ───────────────────────────────────────────────────────

/// The engine may only read local files and inline styles.
const CSP: &str = "default-src 'none'; img-src file:; style-src 'unsafe-inline'";

static RE_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b([^>]*?\s)src\s*=\s*["']([^"']*)["']([^>]*)>"#).unwrap()
});

static RE_IMG_NO_SRC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());

static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());

static RE_ATTR_REL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\brel\s*=\s*["']([^"']*)["']"#).unwrap());

static RE_ATTR_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).unwrap());

static RE_SRCSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\s+srcset\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());

static RE_HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head\b[^>]*>").unwrap());

fn file_url(path: &std::path::Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// Swap every external reference for a resolved local file, drop what does
/// not resolve, and pin the engine to local files with a CSP.
pub fn localize_resources(markup: &str, resolver: &mut ResourceResolver) -> (String, Vec<String>) {
    let mut warnings = Vec::new();

    let out = RE_SRCSET.replace_all(markup, "");

    let out = RE_IMG.replace_all(&out, |caps: &Captures| {
        let src = caps[2].trim();
        match resolver.resolve(src, Relation::Image).as_deref().and_then(file_url) {
            Some(local) => format!("<img{}src=\"{}\"{}>", &caps[1], local, &caps[3]),
            None => {
                if !src.to_ascii_lowercase().starts_with("data:") {
                    warnings.push(format!("image not loaded: {}", src));
                }
                String::new()
            }
        }
    });

    // `<img>` tags without a usable src have nothing to load.
    let out = RE_IMG_NO_SRC.replace_all(&out, |caps: &Captures| {
        if caps[0].contains("src=\"file://") {
            caps[0].to_string()
        } else {
            String::new()
        }
    });

    let out = RE_LINK.replace_all(&out, |caps: &Captures| {
        let tag = &caps[0];
        let rel = RE_ATTR_REL
            .captures(tag)
            .map(|c| Relation::from_rel(&c[1]))
            .unwrap_or(Relation::Other);
        let href = RE_ATTR_HREF.captures(tag).map(|c| c[1].to_string());
        let local = href
            .as_deref()
            .and_then(|h| resolver.resolve(h, rel))
            .as_deref()
            .and_then(file_url);
        match (href, local) {
            (Some(href), Some(local)) => tag.replacen(&href, &local, 1),
            _ => String::new(),
        }
    });

    let csp = format!("<meta http-equiv=\"Content-Security-Policy\" content=\"{CSP}\">");
    let out = match RE_HEAD_OPEN.find(&out) {
        Some(m) => format!("{}{}{}", &out[..m.end()], csp, &out[m.end()..]),
        None => format!("{csp}{out}"),
    };

    (out, warnings)
}

// ── Chrome print-to-PDF ──────────────────────────────────────────────────────

/// Default [`DocumentRenderer`]: headless Chrome's print-to-PDF.
pub struct ChromeRenderer {
    launcher: BrowserLauncher,
    render: RenderConfig,
    load_timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            launcher: BrowserLauncher::from_config(config),
            render: config.render.clone(),
            load_timeout: Duration::from_millis(config.browser.navigation_ms),
        }
    }

    fn print_options(&self) -> PrintToPdfOptions {
        let margin = self.render.page_margin_cm / 2.54;
        PrintToPdfOptions {
            landscape: Some(false),
            display_header_footer: Some(false),
            print_background: Some(true),
            margin_top: Some(margin),
            margin_bottom: Some(margin),
            margin_left: Some(margin),
            margin_right: Some(margin),
            ..Default::default()
        }
    }

    fn print(&self, markup: &str) -> Result<Vec<u8>, String> {
        let mut doc = tempfile::Builder::new()
            .prefix("url2pdf-doc-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| format!("failed to stage document: {e}"))?;
        doc.write_all(markup.as_bytes())
            .and_then(|_| doc.flush())
            .map_err(|e| format!("failed to stage document: {e}"))?;
        let url = file_url(doc.path()).ok_or("staged document has no file URL")?;

        let session = self.launcher.open()?;
        let tab = session.tab();
        tab.set_default_timeout(self.load_timeout);
        tab.navigate_to(&url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| format!("failed to load document: {e}"))?;
        tab.print_to_pdf(Some(self.print_options()))
            .map_err(|e| format!("print failed: {e}"))
    }
}

impl DocumentRenderer for ChromeRenderer {
    fn render(&self, markup: &str, resolver: &mut ResourceResolver) -> RenderOutcome {
        let start = Instant::now();
        let (markup, warnings) = localize_resources(markup, resolver);
        debug!("Localised resources ({} warning(s))", warnings.len());

        match self.print(&markup) {
            Ok(pdf) => {
                info!("Printed {} bytes in {:?}", pdf.len(), start.elapsed());
                RenderOutcome {
                    pdf,
                    warnings,
                    error: None,
                }
            }
            Err(message) => RenderOutcome::failed(message, warnings),
        }
    }
}
