//! Error types for the edgequake-url2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Url2PdfError`] is **fatal**: the conversion cannot proceed at all
//!   (empty payload, URL rejected by the safety policy, target page
//!   unreachable, renderer reported an error). Returned as
//!   `Err(Url2PdfError)` from the top-level `convert*` functions.
//!
//! * [`ResourceError`] is **non-fatal**: a single embedded image could not be
//!   resolved (timeout, wrong content type, over the size ceiling). The
//!   renderer simply draws the document without that image; the error is
//!   logged and counted in [`crate::output::ConversionStats`].
//!
//! Every fatal error maps onto one [`ErrorCategory`] so a hosting runtime can
//! pick a status code without matching on individual variants.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-url2pdf library.
#[derive(Debug, Error)]
pub enum Url2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request payload was empty (or only whitespace).
    #[error("URL not provided")]
    EmptyInput,

    /// The request payload exceeds the configured maximum input size.
    #[error("Request size ({size} bytes) exceeds maximum allowed size ({limit} bytes)")]
    InputTooLarge { size: usize, limit: usize },

    /// The payload is not a structurally valid absolute URL.
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    // ── Security errors ───────────────────────────────────────────────────
    /// The URL was rejected by the SSRF safety policy.
    #[error("Invalid or unsafe URL '{url}': {reason}")]
    UnsafeUrl { url: String, reason: String },

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The target page could not be fetched by any strategy.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// Fetching the target page exceeded its timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    FetchTimeout { url: String, secs: u64 },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The document renderer signalled a fatal error.
    #[error("Error converting HTML to PDF: {message}")]
    RenderFailed { message: String },

    /// An internal pipeline invariant did not hold (empty document, render
    /// task lost, …).
    #[error("Processing error: {0}")]
    Processing(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Conceptual failure categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Empty or malformed input. Never retried.
    InvalidInput,
    /// Rejected by the safety policy. Never retried.
    Rejected,
    /// The target page or the network failed.
    Upstream,
    /// A network operation exceeded its upper bound.
    Timeout,
    /// The renderer reported a fatal error.
    Rendering,
    /// Anything unanticipated.
    Internal,
}

impl ErrorCategory {
    /// HTTP status a hosting function runtime should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCategory::InvalidInput | ErrorCategory::Rejected | ErrorCategory::Upstream => 400,
            ErrorCategory::Timeout => 504,
            ErrorCategory::Rendering | ErrorCategory::Internal => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidInput => "invalid input",
            ErrorCategory::Rejected => "rejected by safety policy",
            ErrorCategory::Upstream => "upstream fetch failure",
            ErrorCategory::Timeout => "upstream timeout",
            ErrorCategory::Rendering => "rendering failure",
            ErrorCategory::Internal => "internal failure",
        }
    }
}

impl Url2PdfError {
    /// Classify this error for the caller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Url2PdfError::EmptyInput
            | Url2PdfError::InputTooLarge { .. }
            | Url2PdfError::InvalidUrl { .. } => ErrorCategory::InvalidInput,
            Url2PdfError::UnsafeUrl { .. } => ErrorCategory::Rejected,
            Url2PdfError::FetchFailed { .. } => ErrorCategory::Upstream,
            Url2PdfError::FetchTimeout { .. } => ErrorCategory::Timeout,
            Url2PdfError::RenderFailed { .. } | Url2PdfError::Processing(_) => {
                ErrorCategory::Rendering
            }
            Url2PdfError::OutputWriteFailed { .. }
            | Url2PdfError::InvalidConfig(_)
            | Url2PdfError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// True for the timeout subtype of external-service failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Url2PdfError::FetchTimeout { .. })
    }
}

/// A non-fatal error for a single embedded resource.
///
/// Produced by [`crate::pipeline::resolve::ResourceResolver`]; the renderer
/// continues without the resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The resource URL failed the safety policy.
    #[error("resource '{url}' rejected: {reason}")]
    Unsafe { url: String, reason: String },

    /// Transport-level failure.
    #[error("failed to download '{url}': {detail}")]
    Network { url: String, detail: String },

    /// Download exceeded the image timeout.
    #[error("download of '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Non-success HTTP status.
    #[error("'{url}' answered HTTP {status}")]
    Status { url: String, status: u16 },

    /// The declared content type is not `image/*`.
    #[error("'{url}' is not an image (Content-Type: {content_type})")]
    NotAnImage { url: String, content_type: String },

    /// Declared or actual size exceeds the image ceiling.
    #[error("'{url}' is {size} bytes, over the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },

    /// Could not materialise the bytes to a temporary file.
    #[error("could not store '{url}': {detail}")]
    Io { url: String, detail: String },
}
