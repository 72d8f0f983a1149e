//! The fixed style template wrapped around every sanitised page.
//!
//! Sanitisation throws away the page's own CSS, so the document look comes
//! entirely from here: one font family forced on every element, readable body
//! text, and bordered tables. Keeping the template in one place means tests
//! can inspect it directly and a look change touches exactly one file.
//!
//! Every declaration is on a single line; the renderer's CSS tokenizer is
//! line-sensitive.

use crate::config::RenderConfig;
use once_cell::sync::Lazy;
use regex::Regex;

/// The style block for `render`, including its `<style>` tags.
pub fn style_block(render: &RenderConfig) -> String {
    let font = &render.font_family;
    format!(
        "<style>\n\
         @page {{ margin: {margin}cm; }}\n\
         * {{ font-family: {font} !important; }}\n\
         body {{ font-family: {font}; font-size: {size}; line-height: {lh}; margin: 0; padding: 0; }}\n\
         table {{ border-collapse: collapse; width: 100%; margin: 10px 0; }}\n\
         th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}\n\
         th {{ background-color: #f2f2f2; font-weight: bold; }}\n\
         img {{ max-width: 100%; }}\n\
         </style>",
        margin = render.page_margin_cm,
        size = render.font_size,
        lh = render.line_height,
    )
}

static RE_HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").unwrap());

static RE_HTML_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html\b[^>]*>").unwrap());

static RE_DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<!doctype\b[^>]*>").unwrap());

/// True when `html` already carries document structure.
pub fn is_full_document(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<!doctype")
}

/// Apply the style template.
///
/// Fragments are wrapped in a complete UTF-8 document. Full documents get
/// the style block spliced in before `</head>`, or inside a new `<head>`
/// right after the `<html>` (or doctype) tag when there is none.
pub fn prepare_document(html: &str, render: &RenderConfig) -> String {
    let styles = style_block(render);

    if !is_full_document(html) {
        return format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n{styles}\n</head>\n<body>\n{html}\n</body>\n</html>"
        );
    }

    if let Some(m) = RE_HEAD_CLOSE.find(html) {
        return splice(html, m.start(), &styles);
    }
    let head = format!("<head><meta charset=\"UTF-8\">{styles}</head>");
    if let Some(m) = RE_HTML_OPEN.find(html) {
        return splice(html, m.end(), &head);
    }
    if let Some(m) = RE_DOCTYPE.find(html) {
        return splice(html, m.end(), &head);
    }
    format!("{head}{html}")
}

fn splice(html: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(insert);
    out.push_str(&html[at..]);
    out
}
