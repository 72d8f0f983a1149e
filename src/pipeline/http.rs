//! Plain HTTP access: the static fetch strategy and image downloads.
//!
//! Both clients send a desktop user agent, validate certificates (rustls),
//! and re-run the URL policy on every redirect hop so a public URL cannot
//! bounce the request to an internal address.

use crate::config::ConversionConfig;
use crate::error::{ResourceError, Url2PdfError};
use crate::output::FetchOrigin;
use crate::pipeline::fetch::PageSource;
use crate::pipeline::input::charset_from_content_type;
use crate::pipeline::resolve::{DownloadedImage, ImageSource};
use crate::pipeline::validate::{TargetUrl, UrlPolicy};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};
use url::Url;

const MAX_REDIRECTS: usize = 10;

fn build_client(
    config: &ConversionConfig,
    policy: &UrlPolicy,
    timeout: Duration,
) -> Result<reqwest::Client, Url2PdfError> {
    let policy = policy.clone();
    let redirects = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match policy.validate(attempt.url().as_str()) {
            Ok(_) => attempt.follow(),
            Err(reason) => {
                let message = format!("redirect to {} refused: {reason}", attempt.url());
                attempt.error(message)
            }
        }
    });

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(config.user_agent.as_str())
        .redirect(redirects)
        .build()
        .map_err(|e| Url2PdfError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Decode an HTML body with the declared charset, else UTF-8 (lossy).
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Body had malformed {} sequences; replaced", used.name());
    }
    text.into_owned()
}

// ── Static page fetch ────────────────────────────────────────────────────────

/// Fetch strategy: one plain GET, no script execution.
pub struct StaticSource {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl StaticSource {
    pub fn new(config: &ConversionConfig, policy: &UrlPolicy) -> Result<Self, Url2PdfError> {
        Ok(Self {
            client: build_client(config, policy, config.fetch_timeout())?,
            timeout_secs: config.fetch_timeout_secs,
        })
    }

    fn map_err(&self, url: &TargetUrl, e: reqwest::Error) -> Url2PdfError {
        if e.is_timeout() {
            Url2PdfError::FetchTimeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            Url2PdfError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PageSource for StaticSource {
    fn origin(&self) -> FetchOrigin {
        FetchOrigin::Static
    }

    async fn fetch_html(&self, url: &TargetUrl) -> Result<String, Url2PdfError> {
        info!("Static fetch: {}", url);

        let response = self
            .client
            .get(url.as_url().clone())
            .send()
            .await
            .map_err(|e| self.map_err(url, e))?;

        if !response.status().is_success() {
            return Err(Url2PdfError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| self.map_err(url, e))?;
        debug!("Static fetch returned {} bytes", bytes.len());
        Ok(decode_body(&bytes, content_type.as_deref()))
    }
}

// ── Image downloads ──────────────────────────────────────────────────────────

/// [`ImageSource`] over reqwest.
///
/// The resolver runs on the renderer's blocking thread, so each download
/// re-enters the runtime through `handle`.
pub struct HttpImageSource {
    client: reqwest::Client,
    handle: Handle,
}

impl HttpImageSource {
    pub fn new(
        config: &ConversionConfig,
        policy: &UrlPolicy,
        handle: Handle,
    ) -> Result<Self, Url2PdfError> {
        Ok(Self {
            client: build_client(config, policy, config.image_timeout())?,
            handle,
        })
    }

    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<DownloadedImage, ResourceError> {
        let net = |e: reqwest::Error| ResourceError::Network {
            url: url.to_string(),
            detail: e.to_string(),
        };

        let mut response = self.client.get(url.clone()).send().await.map_err(net)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(ResourceError::NotAnImage {
                url: url.to_string(),
                content_type: if content_type.is_empty() {
                    "none".to_string()
                } else {
                    content_type
                },
            });
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(ResourceError::TooLarge {
                    url: url.to_string(),
                    size: declared,
                    limit: max_bytes,
                });
            }
        }

        // Content-Length can lie or be absent; count what actually arrives.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(net)? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > max_bytes {
                return Err(ResourceError::TooLarge {
                    url: url.to_string(),
                    size: bytes.len() as u64,
                    limit: max_bytes,
                });
            }
        }

        Ok(DownloadedImage {
            content_type,
            bytes,
        })
    }
}

impl ImageSource for HttpImageSource {
    fn download(
        &self,
        url: &Url,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<DownloadedImage, ResourceError> {
        self.handle.block_on(async {
            match tokio::time::timeout(timeout, self.fetch(url, max_bytes)).await {
                Ok(result) => result,
                Err(_) => Err(ResourceError::Timeout {
                    url: url.to_string(),
                    secs: timeout.as_secs(),
                }),
            }
        })
    }
}
