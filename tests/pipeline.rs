//! Pipeline integration tests.
//!
//! Every network-facing stage is replaced by an in-process fake that counts
//! its calls, so these tests need neither a browser nor a network and run in
//! CI by default.

use async_trait::async_trait;
use edgequake_url2pdf::pipeline::images::image_sources;
use edgequake_url2pdf::{
    ContentCache, ConversionConfig, Converter, DocumentRenderer, DownloadedImage, ErrorCategory,
    FetchOrigin, ImageSource, PageSource, Relation, RenderOutcome, ResourceError,
    ResourceResolver, TargetUrl, Url2PdfError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

// ── Fakes ────────────────────────────────────────────────────────────────────

type Reply = Box<dyn Fn(&TargetUrl) -> Result<String, Url2PdfError> + Send + Sync>;

struct FakePages {
    origin: FetchOrigin,
    calls: AtomicUsize,
    reply: Reply,
}

impl FakePages {
    fn new(
        origin: FetchOrigin,
        reply: impl Fn(&TargetUrl) -> Result<String, Url2PdfError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            origin,
            calls: AtomicUsize::new(0),
            reply: Box::new(reply),
        })
    }

    fn serving(origin: FetchOrigin, html: &'static str) -> Arc<Self> {
        Self::new(origin, move |_| Ok(html.to_string()))
    }

    fn timing_out(origin: FetchOrigin) -> Arc<Self> {
        Self::new(origin, |url| {
            Err(Url2PdfError::FetchTimeout {
                url: url.to_string(),
                secs: 30,
            })
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for FakePages {
    fn origin(&self) -> FetchOrigin {
        self.origin
    }

    async fn fetch_html(&self, url: &TargetUrl) -> Result<String, Url2PdfError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(url)
    }
}

#[derive(Default)]
struct FakeImages {
    calls: AtomicUsize,
    by_url: HashMap<String, (&'static str, Vec<u8>)>,
}

impl FakeImages {
    fn with(mut self, url: &str, content_type: &'static str, bytes: &[u8]) -> Self {
        self.by_url
            .insert(url.to_string(), (content_type, bytes.to_vec()));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageSource for FakeImages {
    fn download(
        &self,
        url: &Url,
        _timeout: Duration,
        _max_bytes: u64,
    ) -> Result<DownloadedImage, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.by_url.get(url.as_str()) {
            Some((content_type, bytes)) => Ok(DownloadedImage {
                content_type: content_type.to_string(),
                bytes: bytes.clone(),
            }),
            None => Err(ResourceError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

enum Behaviour {
    Succeed,
    Fail(&'static str),
    Empty,
    Panic,
}

/// Resolves every `<img src>` like a print engine would and records what it
/// saw while the files were still on disk.
struct RecordingRenderer {
    behaviour: Behaviour,
    calls: AtomicUsize,
    markup: Mutex<Option<String>>,
    files: Mutex<Vec<(PathBuf, bool)>>,
}

impl RecordingRenderer {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            markup: Mutex::new(None),
            files: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn markup(&self) -> String {
        self.markup.lock().unwrap().clone().unwrap_or_default()
    }

    fn files(&self) -> Vec<(PathBuf, bool)> {
        self.files.lock().unwrap().clone()
    }
}

impl DocumentRenderer for RecordingRenderer {
    fn render(&self, markup: &str, resolver: &mut ResourceResolver) -> RenderOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.markup.lock().unwrap() = Some(markup.to_string());

        let mut warnings = Vec::new();
        for src in image_sources(markup) {
            match resolver.resolve(&src, Relation::Image) {
                Some(path) => {
                    let exists = path.exists();
                    self.files.lock().unwrap().push((path, exists));
                }
                None => warnings.push(format!("image not loaded: {src}")),
            }
        }

        match self.behaviour {
            Behaviour::Succeed => RenderOutcome {
                pdf: b"%PDF-1.4\n%fake\n".to_vec(),
                warnings,
                error: None,
            },
            Behaviour::Fail(message) => RenderOutcome::failed(message, warnings),
            Behaviour::Empty => RenderOutcome {
                pdf: Vec::new(),
                warnings,
                error: None,
            },
            Behaviour::Panic => panic!("print engine crashed"),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Harness {
    rendered: Arc<FakePages>,
    fallback: Arc<FakePages>,
    images: Arc<FakeImages>,
    renderer: Arc<RecordingRenderer>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(rendered: Arc<FakePages>, fallback: Arc<FakePages>) -> Self {
        Self {
            rendered,
            fallback,
            images: Arc::new(FakeImages::default()),
            renderer: RecordingRenderer::new(Behaviour::Succeed),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn images(mut self, images: FakeImages) -> Self {
        self.images = Arc::new(images);
        self
    }

    fn renderer(mut self, behaviour: Behaviour) -> Self {
        self.renderer = RecordingRenderer::new(behaviour);
        self
    }

    fn converter(&self, config: ConversionConfig) -> Converter {
        Converter::builder(config)
            .rendered_source(self.rendered.clone())
            .static_source(self.fallback.clone())
            .image_source(self.images.clone())
            .renderer(self.renderer.clone())
            .temp_dir(self.dir.path())
            .build()
            .unwrap()
    }

    fn files_left(&self) -> usize {
        files_in(self.dir.path())
    }
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn page(html: &'static str) -> Harness {
    Harness::new(
        FakePages::serving(FetchOrigin::Rendered, html),
        FakePages::serving(FetchOrigin::Static, "<p>static</p>"),
    )
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_url_never_touches_the_network() {
    let h = page("<p>never</p>");
    let converter = h.converter(ConversionConfig::default());

    for url in [
        "http://127.0.0.1/admin",
        "http://localhost:8080/",
        "http://169.254.169.254/latest/meta-data/",
        "http://10.1.2.3/",
        "http://192.168.0.1/",
        "http://[::1]/",
        "http://[::ffff:127.0.0.1]/",
        "ftp://example.com/file",
        "file:///etc/passwd",
        "javascript:alert(1)",
    ] {
        let err = converter.convert_url(url).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Rejected, "{url}: {err}");
    }

    assert_eq!(h.rendered.calls(), 0);
    assert_eq!(h.fallback.calls(), 0);
    assert_eq!(h.images.calls(), 0);
    assert_eq!(h.renderer.calls(), 0);
}

#[tokio::test]
async fn test_invalid_input_is_not_a_rejection() {
    let h = page("<p>never</p>");
    let converter = h.converter(ConversionConfig::default());

    let empty = converter.convert_url("   \n").await.unwrap_err();
    assert!(matches!(empty, Url2PdfError::EmptyInput));

    let malformed = converter.convert_url("not a url").await.unwrap_err();
    assert_eq!(malformed.category(), ErrorCategory::InvalidInput);
    assert_eq!(h.fallback.calls(), 0);
}

#[tokio::test]
async fn test_oversized_payload_is_refused() {
    let h = page("<p>never</p>");
    let config = ConversionConfig::builder().max_input_bytes(32).build().unwrap();
    let converter = h.converter(config);

    let url = format!("https://example.com/{}", "a".repeat(64));
    let err = converter.convert_url(&url).await.unwrap_err();
    assert!(matches!(err, Url2PdfError::InputTooLarge { limit: 32, .. }));
    assert_eq!(h.rendered.calls(), 0);
}

#[tokio::test]
async fn test_payload_declared_charset_is_honoured() {
    let h = page("<p>ok</p>");
    let converter = h.converter(ConversionConfig::default());

    let out = converter
        .convert_payload(b"https://example.com/caf\xe9", Some("iso-8859-1"))
        .await
        .unwrap();
    assert_eq!(out.url, "https://example.com/caf%C3%A9");
}

// ── Fetching ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rendered_timeout_still_produces_a_document() {
    let h = Harness::new(
        FakePages::timing_out(FetchOrigin::Rendered),
        FakePages::serving(FetchOrigin::Static, "<table><tr><td>static</td></tr></table>"),
    );
    let converter = h.converter(ConversionConfig::default());

    let out = converter.convert_url("https://example.com/report").await.unwrap();
    assert!(out.pdf.starts_with(b"%PDF"));
    assert_eq!(out.stats.origin, Some(FetchOrigin::Static));
    assert_eq!((h.rendered.calls(), h.fallback.calls()), (1, 1));
    assert!(h.renderer.markup().contains("<td>static</td>"));
}

#[tokio::test]
async fn test_static_timeout_surfaces_as_timeout() {
    let h = Harness::new(
        FakePages::timing_out(FetchOrigin::Rendered),
        FakePages::timing_out(FetchOrigin::Static),
    );
    let converter = h.converter(ConversionConfig::default());

    let err = converter.convert_url("https://slow.example/").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.category().status_code(), 504);
    assert_eq!(h.renderer.calls(), 0);
}

#[tokio::test]
async fn test_browser_disabled_goes_straight_to_static() {
    let h = page("<p>rendered</p>");
    let config = ConversionConfig::builder().use_browser(false).build().unwrap();
    let converter = h.converter(config);

    let out = converter.convert_url("https://example.com/").await.unwrap();
    assert_eq!(out.stats.origin, Some(FetchOrigin::Static));
    assert_eq!(h.rendered.calls(), 0);
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let h = page("<p>fresh</p>");
    let converter = h.converter(ConversionConfig::default());

    let first = converter.convert_url("https://example.com/a").await.unwrap();
    let second = converter.convert_url("https://example.com/a").await.unwrap();

    assert_eq!(first.stats.origin, Some(FetchOrigin::Rendered));
    assert_eq!(second.stats.origin, Some(FetchOrigin::Cache));
    assert_eq!(h.rendered.calls(), 1);
    assert_eq!(h.fallback.calls(), 0);
    assert_eq!(h.renderer.calls(), 2);
    assert_eq!(converter.cache().len(), 1);
}

#[tokio::test]
async fn test_shared_cache_across_converters() {
    let cache = Arc::new(ContentCache::new(Duration::from_secs(60), true));
    let first = page("<p>one</p>");
    let second = page("<p>two</p>");

    let build = |h: &Harness| {
        Converter::builder(ConversionConfig::default())
            .cache(cache.clone())
            .rendered_source(h.rendered.clone())
            .static_source(h.fallback.clone())
            .image_source(h.images.clone())
            .renderer(h.renderer.clone())
            .build()
            .unwrap()
    };

    build(&first).convert_url("https://example.com/x").await.unwrap();
    let out = build(&second).convert_url("https://example.com/x").await.unwrap();

    assert_eq!(out.stats.origin, Some(FetchOrigin::Cache));
    assert_eq!(second.rendered.calls(), 0);
    assert!(second.renderer.markup().contains("<p>one</p>"));
}

#[tokio::test]
async fn test_disabled_cache_fetches_every_time() {
    let h = page("<p>x</p>");
    let config = ConversionConfig::builder().cache_enabled(false).build().unwrap();
    let converter = h.converter(config);

    converter.convert_url("https://example.com/").await.unwrap();
    converter.convert_url("https://example.com/").await.unwrap();
    assert_eq!(h.rendered.calls(), 2);
    assert!(converter.cache().is_empty());
}

// ── Assembly ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_markup_is_sanitised_and_styled() {
    let h = page(
        r#"<html><head><style>@media print { body { color: red } }</style>
<link rel="stylesheet" href="/site.css"></head>
<body onload="x()"><script>track()</script><p style="color: var(--x)">Hi</p></body></html>"#,
    );
    let converter = h.converter(ConversionConfig::default());
    converter.convert_url("https://example.com/").await.unwrap();

    let markup = h.renderer.markup();
    assert!(!markup.contains("<script"));
    assert!(!markup.contains("@media"));
    assert!(!markup.contains("var("));
    assert!(!markup.contains("site.css"));
    assert!(markup.contains("border-collapse: collapse"));
    assert!(markup.contains("<p"));
    assert!(markup.contains("Hi</p>"));
}

#[tokio::test]
async fn test_fragment_is_wrapped_in_full_document() {
    let h = page("<p>bare fragment</p>");
    let converter = h.converter(ConversionConfig::default());
    converter.convert_url("https://example.com/").await.unwrap();

    let markup = h.renderer.markup();
    assert!(markup.starts_with("<!DOCTYPE html>"));
    assert!(markup.contains(r#"<meta charset="UTF-8">"#));
    assert!(markup.contains("<p>bare fragment</p>"));
}

#[tokio::test]
async fn test_relative_images_are_resolved_and_cleaned_up() {
    let h = page(r#"<p>chart</p><img src="img/a.png"><img src="https://cdn.example/b.png">"#)
        .images(
            FakeImages::default()
                .with("https://example.com/docs/img/a.png", "image/png", PNG)
                .with("https://cdn.example/b.png", "image/png", PNG),
        );
    let converter = h.converter(ConversionConfig::default());

    let out = converter.convert_url("https://example.com/docs/page").await.unwrap();

    assert!(h
        .renderer
        .markup()
        .contains(r#"<img src="https://example.com/docs/img/a.png">"#));
    let files = h.renderer.files();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|(_, existed)| *existed));
    assert!(files.iter().all(|(path, _)| !path.exists()));
    assert_eq!(h.files_left(), 0);
    assert_eq!(out.stats.images_resolved, 2);
    assert_eq!(out.stats.images_failed, 0);
    assert!(out.stats.warnings.is_empty());
}

#[tokio::test]
async fn test_oversized_image_is_skipped_without_files() {
    let big = vec![0u8; 4096];
    let h = page(r#"<img src="/big.png"><p>text</p>"#)
        .images(FakeImages::default().with("https://example.com/big.png", "image/png", &big));
    let config = ConversionConfig::builder().max_image_bytes(1024).build().unwrap();
    let converter = h.converter(config);

    let out = converter.convert_url("https://example.com/").await.unwrap();

    assert!(h.renderer.files().is_empty());
    assert_eq!(h.files_left(), 0);
    assert_eq!(out.stats.images_resolved, 0);
    assert_eq!(out.stats.images_failed, 1);
    assert_eq!(out.stats.warnings, vec!["image not loaded: https://example.com/big.png"]);
}

#[tokio::test]
async fn test_images_on_internal_hosts_are_never_downloaded() {
    let h = page(r#"<img src="http://10.0.0.5/x.png"><img src="http://169.254.169.254/y.png">"#)
        .images(FakeImages::default().with("http://10.0.0.5/x.png", "image/png", PNG));
    let converter = h.converter(ConversionConfig::default());

    let out = converter.convert_url("https://example.com/").await.unwrap();
    assert_eq!(h.images.calls(), 0);
    assert_eq!(out.stats.images_failed, 2);
}

#[tokio::test]
async fn test_non_image_response_is_discarded() {
    let h = page(r#"<img src="/pixel">"#)
        .images(FakeImages::default().with("https://example.com/pixel", "text/html", b"<html>"));
    let converter = h.converter(ConversionConfig::default());

    let out = converter.convert_url("https://example.com/").await.unwrap();
    assert_eq!(out.stats.images_failed, 1);
    assert_eq!(h.files_left(), 0);
}

#[tokio::test]
async fn test_renderer_error_is_fatal_and_cleans_up() {
    let h = page(r#"<img src="/a.png"><p>x</p>"#)
        .images(FakeImages::default().with("https://example.com/a.png", "image/png", PNG))
        .renderer(Behaviour::Fail("unsupported table layout"));
    let converter = h.converter(ConversionConfig::default());

    let err = converter.convert_url("https://example.com/").await.unwrap_err();
    match err {
        Url2PdfError::RenderFailed { ref message } => {
            assert_eq!(message, "unsupported table layout")
        }
        other => panic!("expected RenderFailed, got {other:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::Rendering);
    assert_eq!(h.renderer.files().len(), 1);
    assert_eq!(h.files_left(), 0);
}

#[tokio::test]
async fn test_empty_render_is_a_processing_error() {
    let h = page("<p>x</p>").renderer(Behaviour::Empty);
    let converter = h.converter(ConversionConfig::default());

    let err = converter.convert_url("https://example.com/").await.unwrap_err();
    assert!(matches!(err, Url2PdfError::Processing(_)));
}

#[tokio::test]
async fn test_renderer_panic_still_removes_files() {
    let h = page(r#"<img src="/a.png">"#)
        .images(FakeImages::default().with("https://example.com/a.png", "image/png", PNG))
        .renderer(Behaviour::Panic);
    let converter = h.converter(ConversionConfig::default());

    let err = converter.convert_url("https://example.com/").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Internal);
    assert_eq!(h.files_left(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_files() {
    let h = page(r#"<img src="/a.png"><p>x</p>"#)
        .images(FakeImages::default().with("https://example.com/a.png", "image/png", PNG));
    let config = ConversionConfig::builder().cache_enabled(false).build().unwrap();
    let converter = Arc::new(h.converter(config));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let c = converter.clone();
            tokio::spawn(async move { c.convert_url("https://example.com/").await })
        })
        .collect();
    for task in tasks {
        let out = task.await.unwrap().unwrap();
        assert_eq!(out.stats.images_resolved, 1);
    }

    let files = h.renderer.files();
    assert_eq!(files.len(), 4);
    let mut paths: Vec<_> = files.iter().map(|(p, _)| p.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert_eq!(h.files_left(), 0);
    // One download per request: resolver caches are per pass.
    assert_eq!(h.images.calls(), 4);
}

// ── Cache maintenance ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sweep_cache_drops_expired_entries() {
    let h = page("<p>x</p>");
    let config = ConversionConfig::builder().cache_ttl_secs(0).build().unwrap();
    let converter = h.converter(config);

    converter.convert_url("https://example.com/").await.unwrap();
    assert_eq!(converter.cache().len(), 1);
    assert_eq!(converter.sweep_cache(), 1);
    assert!(converter.cache().is_empty());
    assert_eq!(converter.sweep_cache(), 0);
}
