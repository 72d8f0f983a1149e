//! Resource resolution: the per-render callback that externalises images.
//!
//! The renderer asks for every resource it meets; the resolver answers with a
//! local file path or `None`. A `None` means "render without it", never an
//! error. Rules, in order:
//!
//! 1. stylesheet/script relations and `.css`/`.js` URIs are skipped
//! 2. `data:` URIs are skipped
//! 3. anything that is not an absolute `http(s)` URI is skipped
//! 4. the per-pass cache answers repeated URIs (hits and misses alike)
//! 5. the URI must pass the [`UrlPolicy`]
//! 6. the download must declare an `image/*` type and fit under the size
//!    ceiling; only then are bytes written to a temp file
//!
//! One resolver serves one assembly pass. Its caches and files are owned by
//! that pass and deleted when [`ResourceResolver::cleanup`] runs or the
//! resolver is dropped, whichever comes first.

use crate::error::ResourceError;
use crate::pipeline::validate::UrlPolicy;
use image::ImageFormat;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, info, warn};
use url::Url;

/// Extensions kept from the URL path; anything else is sniffed.
const KNOWN_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const DEFAULT_EXTENSION: &str = "jpg";
const TEMP_PREFIX: &str = "url2pdf-img-";

/// Bytes returned by an [`ImageSource`].
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    /// Declared `Content-Type`, lowercased.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Where image bytes come from. Blocking: called from the renderer thread.
pub trait ImageSource: Send + Sync {
    fn download(
        &self,
        url: &Url,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<DownloadedImage, ResourceError>;
}

/// How the document refers to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Image,
    Stylesheet,
    Script,
    Other,
}

impl Relation {
    /// Map a `rel` attribute value.
    pub fn from_rel(rel: &str) -> Self {
        let rel = rel.to_ascii_lowercase();
        if rel.split_whitespace().any(|r| r == "stylesheet") {
            Relation::Stylesheet
        } else if rel.contains("script") {
            Relation::Script
        } else if rel.contains("image") || rel.contains("icon") {
            Relation::Image
        } else {
            Relation::Other
        }
    }
}

/// Download bounds for one pass.
#[derive(Debug, Clone, Copy)]
pub struct ResolverLimits {
    pub timeout: Duration,
    pub max_bytes: u64,
}

/// Per-pass resource resolver.
pub struct ResourceResolver {
    base: Url,
    limits: ResolverLimits,
    policy: UrlPolicy,
    source: Arc<dyn ImageSource>,
    temp_dir: PathBuf,
    resolved: HashMap<String, PathBuf>,
    rejected: HashSet<String>,
    errors: Vec<ResourceError>,
    files: Vec<TempPath>,
}

impl ResourceResolver {
    pub fn new(
        base: Url,
        limits: ResolverLimits,
        policy: UrlPolicy,
        source: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            base,
            limits,
            policy,
            source,
            temp_dir: std::env::temp_dir(),
            resolved: HashMap::new(),
            rejected: HashSet::new(),
            errors: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Materialise files under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Local file for `uri`, or `None` to render without it.
    pub fn resolve(&mut self, uri: &str, relation: Relation) -> Option<PathBuf> {
        let uri = uri.trim();

        if matches!(relation, Relation::Stylesheet | Relation::Script) || is_script_or_style(uri) {
            debug!("Skipping style/script resource: {}", uri);
            return None;
        }

        let lower = uri.to_ascii_lowercase();
        if lower.starts_with("data:") {
            debug!("Skipping data URI");
            return None;
        }
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            debug!("Skipping resource {} ({:?}) on {}", uri, relation, self.base);
            return None;
        }

        if let Some(path) = self.resolved.get(uri) {
            debug!("Using cached resource: {}", uri);
            return Some(path.clone());
        }
        if self.rejected.contains(uri) {
            return None;
        }

        match self.fetch_to_file(uri) {
            Ok(path) => {
                self.resolved.insert(uri.to_string(), path.clone());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to load image resource: {}", e);
                self.rejected.insert(uri.to_string());
                self.errors.push(e);
                None
            }
        }
    }

    fn fetch_to_file(&mut self, uri: &str) -> Result<PathBuf, ResourceError> {
        let target = self
            .policy
            .validate(uri)
            .map_err(|reason| ResourceError::Unsafe {
                url: uri.to_string(),
                reason: reason.to_string(),
            })?;
        let url = target.as_url();

        let image = self
            .source
            .download(url, self.limits.timeout, self.limits.max_bytes)?;

        if !image.content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(ResourceError::NotAnImage {
                url: uri.to_string(),
                content_type: image.content_type,
            });
        }
        let size = image.bytes.len() as u64;
        if size > self.limits.max_bytes {
            return Err(ResourceError::TooLarge {
                url: uri.to_string(),
                size,
                limit: self.limits.max_bytes,
            });
        }

        let ext = extension_for(url, &image.bytes);
        let path = self.write_temp(uri, ext, &image.bytes)?;
        info!(
            "Downloaded image: {} ({} bytes) -> {}",
            uri,
            size,
            path.display()
        );
        Ok(path)
    }

    fn write_temp(&mut self, uri: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf, ResourceError> {
        let io = |e: std::io::Error| ResourceError::Io {
            url: uri.to_string(),
            detail: e.to_string(),
        };
        let suffix = format!(".{ext}");
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.temp_dir)
            .map_err(io)?;
        file.write_all(bytes).map_err(io)?;
        file.flush().map_err(io)?;

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        self.files.push(temp_path);
        Ok(path)
    }

    /// Every file materialised so far.
    pub fn cleanup_list(&self) -> Vec<PathBuf> {
        self.files.iter().map(|p| p.to_path_buf()).collect()
    }

    /// Images materialised this pass.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Non-fatal failures this pass, one per distinct URI.
    pub fn errors(&self) -> &[ResourceError] {
        &self.errors
    }

    /// Delete every materialised file. Failures are logged, never raised.
    /// Returns how many files were removed.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for temp_path in self.files.drain(..) {
            let path = temp_path.to_path_buf();
            match temp_path.close() {
                Ok(()) => {
                    debug!("Cleaned up temp file: {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to clean up temp file {}: {}", path.display(), e),
            }
        }
        self.resolved.clear();
        removed
    }
}

impl Drop for ResourceResolver {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            self.cleanup();
        }
    }
}

fn is_script_or_style(uri: &str) -> bool {
    let path = uri
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(uri)
        .to_ascii_lowercase();
    path.ends_with(".css") || path.ends_with(".js")
}

/// Extension from the URL path when recognised, else from the bytes.
fn extension_for(url: &Url, bytes: &[u8]) -> &'static str {
    let from_path = Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if let Some(ext) = from_path {
        if let Some(known) = KNOWN_EXTENSIONS.iter().copied().find(|k| *k == ext) {
            return known;
        }
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::WebP) => "webp",
        _ => DEFAULT_EXTENSION,
    }
}
