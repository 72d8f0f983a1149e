//! Pipeline stages for URL-to-PDF conversion.
//!
//! Each submodule implements exactly one step. The network-facing stages sit
//! behind traits ([`fetch::PageSource`], [`resolve::ImageSource`],
//! [`render::DocumentRenderer`]) so every step can be tested without a
//! browser or a network.
//!
//! ## Data Flow
//!
//! ```text
//! payload ──▶ input ──▶ validate ──▶ fetch ──────────────▶ images ──▶ render
//! (bytes)    (decode)   (SSRF)     (cache│browser│http)   (absolute  (Chrome +
//!                                   └─▶ sanitize           src)       resolve)
//! ```
//!
//! 1. [`input`]    decode the request payload and enforce the size limit
//! 2. [`validate`] fail closed on unsafe URLs before any network access
//! 3. [`fetch`]    cache, then [`browser`] (rendered), then [`http`] (static),
//!    then [`sanitize`] the result before it is cached
//! 4. [`images`]   make every relative `<img src>` absolute
//! 5. [`render`]   print to PDF with a fresh [`resolve::ResourceResolver`]
//!    supplying local copies of permitted images

pub mod browser;
pub mod fetch;
pub mod http;
pub mod images;
pub mod input;
pub mod render;
pub mod resolve;
pub mod sanitize;
pub mod validate;
