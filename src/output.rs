//! Result types returned by the conversion entry points.

use serde::Serialize;

/// Where the page markup came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrigin {
    /// Served from the content cache; no network traffic.
    Cache,
    /// Headless browser, after scripts ran.
    Rendered,
    /// Plain HTTP GET.
    Static,
}

impl std::fmt::Display for FetchOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FetchOrigin::Cache => "cache",
            FetchOrigin::Rendered => "rendered",
            FetchOrigin::Static => "static",
        })
    }
}

/// A finished conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The PDF document bytes. Never empty.
    pub pdf: Vec<u8>,
    /// The validated URL that was converted.
    pub url: String,
    /// Counters and timings.
    pub stats: ConversionStats,
}

/// Counters and timings for one conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// `None` only if the run stopped before fetching.
    pub origin: Option<FetchOrigin>,
    /// Sanitised markup size in bytes.
    pub html_bytes: usize,
    /// Final PDF size in bytes.
    pub pdf_bytes: usize,
    /// Images the resolver materialised to local files.
    pub images_resolved: usize,
    /// Images rejected or failed (document rendered without them).
    pub images_failed: usize,
    /// Non-fatal renderer warnings.
    pub warnings: Vec<String>,
    pub fetch_duration_ms: u64,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}
