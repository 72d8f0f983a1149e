//! # edgequake-url2pdf
//!
//! Convert live web pages to PDF without letting the request reach places it
//! should not.
//!
//! ## Why this crate?
//!
//! "Print this URL" endpoints are a classic SSRF vector, and modern pages are
//! hostile to simple print engines: tables filled in by script, CSS the
//! engine cannot parse, images on a dozen CDNs. This crate refuses internal
//! addresses before any network access, renders the page in headless Chrome
//! (falling back to a plain GET), reduces the markup to a renderer-safe
//! subset, and prints it with a fixed, readable style.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL payload
//!  │
//!  ├─ 1. Input     decode bytes, enforce size limit
//!  ├─ 2. Validate  scheme, blocked hosts, reserved ranges (fail closed)
//!  ├─ 3. Fetch     cache → headless Chrome → plain HTTP, then sanitise
//!  ├─ 4. Images    relative <img src> → absolute
//!  ├─ 5. Template  fixed font/table styles
//!  └─ 6. Render    print to PDF; images resolved to temp files, then removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_url2pdf::{ConversionConfig, Converter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConversionConfig::from_env()?)?;
//!     let output = converter.convert_url("https://example.com/report").await?;
//!     std::fs::write("report.pdf", &output.pdf)?;
//!     eprintln!("fetched via {:?}, {} image(s)",
//!         output.stats.origin,
//!         output.stats.images_resolved);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `url2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-url2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## Error categories
//!
//! Every [`Url2PdfError`] maps onto an [`ErrorCategory`] with a suggested
//! HTTP status, so a hosting function can answer without matching on
//! variants:
//!
//! | Category | Status | Examples |
//! |----------|--------|----------|
//! | `InvalidInput` | 400 | empty payload, malformed URL |
//! | `Rejected` | 400 | loopback, private range, metadata service |
//! | `Upstream` | 400 | HTTP 404 from the target, DNS failure |
//! | `Timeout` | 504 | static fetch exceeded its bound |
//! | `Rendering` | 500 | print engine error |
//! | `Internal` | 500 | anything else |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod template;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::ContentCache;
pub use config::{BrowserTimeouts, ConversionConfig, ConversionConfigBuilder, RenderConfig};
pub use convert::{
    check_url, convert, convert_sync, convert_to_file, write_atomic, Converter, ConverterBuilder,
};
pub use error::{ErrorCategory, ResourceError, Url2PdfError};
pub use output::{ConversionOutput, ConversionStats, FetchOrigin};
pub use pipeline::fetch::PageSource;
pub use pipeline::render::{DocumentRenderer, RenderOutcome};
pub use pipeline::resolve::{DownloadedImage, ImageSource, Relation, ResourceResolver};
pub use pipeline::validate::{TargetUrl, UrlPolicy};
