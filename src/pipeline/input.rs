//! Input decoding: turn a raw request payload into the URL string.
//!
//! Hosting runtimes hand over the request body as bytes, and callers send it
//! in whatever encoding their client defaults to. Decoding order:
//!
//! 1. a byte-order mark wins outright
//! 2. an explicitly declared charset (e.g. from `Content-Type`), if it
//!    decodes without errors
//! 3. strict UTF-8
//! 4. a statistically detected legacy encoding (`chardetng`), if it decodes
//!    without errors
//! 5. UTF-8 with U+FFFD replacement
//!
//! The size limit is checked on the raw bytes before any decoding happens.

use crate::error::Url2PdfError;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use tracing::debug;

/// Decode `payload` into a trimmed, non-empty URL string.
pub fn read_url(
    payload: &[u8],
    declared_charset: Option<&str>,
    max_bytes: usize,
) -> Result<String, Url2PdfError> {
    if payload.len() > max_bytes {
        return Err(Url2PdfError::InputTooLarge {
            size: payload.len(),
            limit: max_bytes,
        });
    }

    let text = decode_payload(payload, declared_charset);
    let url = text.trim();
    if url.is_empty() {
        return Err(Url2PdfError::EmptyInput);
    }
    Ok(url.to_string())
}

/// Decode bytes to text. Never fails; undecodable bytes become U+FFFD.
pub fn decode_payload<'a>(payload: &'a [u8], declared_charset: Option<&str>) -> Cow<'a, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(payload) {
        debug!("Payload carries a {} BOM", encoding.name());
        let (text, _) = encoding.decode_without_bom_handling(&payload[bom_len..]);
        return text;
    }

    if let Some(encoding) = declared_charset.and_then(|c| Encoding::for_label(c.trim().as_bytes())) {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(payload) {
            return text;
        }
        debug!("Payload is not valid {}, trying UTF-8", encoding.name());
    }

    if let Ok(s) = std::str::from_utf8(payload) {
        return Cow::Borrowed(s);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(payload, true);
    let guessed = detector.guess(None, false);
    if let Some(text) = guessed.decode_without_bom_handling_and_without_replacement(payload) {
        debug!("Payload is not valid UTF-8, detected {}", guessed.name());
        return text;
    }

    debug!("Payload is not valid UTF-8 or {}, decoding lossily", guessed.name());
    let (text, _) = UTF_8.decode_without_bom_handling(payload);
    text
}

/// The `charset` parameter of a `Content-Type` header value, if any.
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}
