//! Rewrite relative `<img src>` references to absolute URLs.
//!
//! Runs after sanitisation and before the style template is applied, so the
//! resource resolver only ever sees absolute URLs. References that are
//! already absolute, `data:` URIs, empty, or bare anchors are left alone, as
//! is anything that does not join cleanly against the page URL.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;
use url::Url;

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b([^>]*?\s)src\s*=\s*(["'])([^"']*)["']([^>]*)>"#).unwrap()
});

/// Make every relative image reference in `html` absolute against `base`.
pub fn absolutize_images(html: &str, base: &Url) -> String {
    let mut rewritten = 0usize;
    let out = RE_IMG_SRC.replace_all(html, |caps: &Captures| {
        let src = caps[3].trim();
        match absolute_src(src, base) {
            Some(abs) => {
                rewritten += 1;
                format!(
                    "<img{}src={q}{}{q}{}>",
                    &caps[1],
                    abs,
                    &caps[4],
                    q = &caps[2]
                )
            }
            None => caps[0].to_string(),
        }
    });
    if rewritten > 0 {
        debug!("Rewrote {} relative image reference(s)", rewritten);
    }
    out.into_owned()
}

fn absolute_src(src: &str, base: &Url) -> Option<String> {
    let lower = src.to_ascii_lowercase();
    if src.is_empty()
        || src.starts_with('#')
        || lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
    {
        return None;
    }
    base.join(src).ok().map(String::from)
}

/// Every `<img src>` value in `html`, in document order.
pub fn image_sources(html: &str) -> Vec<String> {
    RE_IMG_SRC
        .captures_iter(html)
        .map(|c| c[3].trim().to_string())
        .collect()
}
