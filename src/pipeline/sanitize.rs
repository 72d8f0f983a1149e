//! Sanitisation: reduce arbitrary page HTML/CSS to what the renderer accepts.
//!
//! ## Why strip instead of parse?
//!
//! Real pages ship minified, vendor-prefixed, deeply nested CSS and inline
//! scripts. Parsing a "safe subset" of that is unreliable, so this module
//! removes whole construct families with cheap regex passes and lets the
//! fixed style template (see [`crate::template`]) supply the look instead.
//!
//! ## Pass Order
//!
//! Each pass is a pure `&str → String` function with a precondition it relies
//! on and a postcondition it guarantees. Later passes assume earlier ones ran:
//!
//! 1. `scripts`: post: no `<script` tag remains, open or closed
//! 2. `style_blocks`: post: no `<style` block and no `<link>` element
//! 3. `block_at_rules`: pre: style blocks gone, so any `@rule { … }` left is
//!    stray CSS text. Post: no braced at-rule with ≤1 level of nesting
//! 4. `statement_at_rules`: post: no `@import`/`@charset`/`@namespace`
//! 5. `css_functions`: inside `{ … }` bodies, `var()`/`calc()` become `0`,
//!    colour and `url()` functions and custom properties are removed
//! 6. `selectors`: pseudo-function and attribute selectors removed
//! 7. `declarations`: inside `{ … }` bodies, vendor-prefixed, animation,
//!    transition, transform and `content:` declarations removed
//! 8. `asset_hrefs`: `href`s to `.css`/`.js` files emptied
//! 9. `inline_styles`: every `style="…"` attribute removed
//! 10. `fold_declaration_bodies`: pre: passes 3–7 removed what could nest.
//!     Post: no newline or tab inside a `{ … }` body
//!
//! Passes 5 and 7 never look outside brace bodies, so body text such as
//! `Table of content: intro;` is left alone.
//!
//! The whole chain is repeated until the output stops changing. Removing one
//! construct can expose another, e.g. `<scr<script></script>ipt>` or an
//! at-rule nested two levels deep, so a single round is not idempotent but
//! the fixed point is. Every pass either shortens its input or replaces a
//! tab/newline with a space, so the loop terminates.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// A named transform pass.
#[derive(Clone, Copy)]
pub struct Pass {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// The passes in the order they run.
pub const PASSES: [Pass; 10] = [
    Pass { name: "scripts", apply: strip_scripts },
    Pass { name: "style_blocks", apply: strip_style_blocks },
    Pass { name: "block_at_rules", apply: strip_block_at_rules },
    Pass { name: "statement_at_rules", apply: strip_statement_at_rules },
    Pass { name: "css_functions", apply: strip_css_functions },
    Pass { name: "selectors", apply: strip_complex_selectors },
    Pass { name: "declarations", apply: strip_declarations },
    Pass { name: "asset_hrefs", apply: neutralise_asset_hrefs },
    Pass { name: "inline_styles", apply: strip_inline_styles },
    Pass { name: "fold_declaration_bodies", apply: fold_declaration_bodies },
];

/// Sanitise `html` for the renderer. Pure; `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(html: &str) -> String {
    let mut current = html.to_string();
    let mut rounds = 1usize;
    loop {
        let next = run_round(&current);
        if next == current {
            break;
        }
        current = next;
        rounds += 1;
    }
    debug!(
        "Sanitised {} → {} bytes in {} round(s)",
        html.len(),
        current.len(),
        rounds
    );
    current
}

fn run_round(input: &str) -> String {
    PASSES
        .iter()
        .fold(input.to_string(), |acc, pass| (pass.apply)(&acc))
}

// Innermost `{ … }` body that does not cross a tag.
static RE_BRACE_BODY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}<>]*\}").unwrap());

fn within_bodies(input: &str, rewrite: impl Fn(&str) -> String) -> String {
    RE_BRACE_BODY
        .replace_all(input, |caps: &regex::Captures| rewrite(&caps[0]))
        .into_owned()
}

// ── Pass 1: Scripts ──────────────────────────────────────────────────────────

static RE_SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?(?:</script\s*>|\z)").unwrap());

static RE_NOSCRIPT_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</script\s*>").unwrap());

/// An unterminated `<script` swallows the rest of the document.
fn strip_scripts(input: &str) -> String {
    let s = RE_SCRIPT_BLOCK.replace_all(input, "");
    RE_NOSCRIPT_CLOSE.replace_all(&s, "").into_owned()
}

// ── Pass 2: Stylesheet links and style blocks ───────────────────────────────

static RE_STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b.*?(?:</style\s*>|\z)").unwrap());

static RE_STYLE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</style\s*>").unwrap());

static RE_LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());

fn strip_style_blocks(input: &str) -> String {
    let s = RE_STYLE_BLOCK.replace_all(input, "");
    let s = RE_STYLE_CLOSE.replace_all(&s, "");
    RE_LINK_TAG.replace_all(&s, "").into_owned()
}

// ── Pass 3: Braced at-rules ─────────────────────────────────────────────────

// One level of inner braces: `@media x { a { … } b { … } }`.
static RE_BLOCK_AT_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@-?[a-z][a-z-]*[^{};<>@]*\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap()
});

fn strip_block_at_rules(input: &str) -> String {
    RE_BLOCK_AT_RULE.replace_all(input, "").into_owned()
}

// ── Pass 4: Statement at-rules ──────────────────────────────────────────────

static RE_STATEMENT_AT_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@(?:import|charset|namespace|layer)\b[^;{}<>]*;").unwrap()
});

fn strip_statement_at_rules(input: &str) -> String {
    RE_STATEMENT_AT_RULE.replace_all(input, "").into_owned()
}

// ── Pass 5: Modern CSS functions and custom properties ─────────────────────

static RE_ZEROED_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:var|calc)\([^()]*\)").unwrap());

static RE_DROPPED_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:rgba?|hsla?|url)\([^()]*\)").unwrap());

static RE_CUSTOM_PROPERTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|([;{])|\s)\s*--[a-z0-9_-]+\s*:[^;{}<>]*;").unwrap());

/// Innermost calls first: `calc(1px + var(--x))` needs two rounds.
fn strip_css_functions(input: &str) -> String {
    within_bodies(input, |body| {
        let s = RE_ZEROED_FN.replace_all(body, "0");
        let s = RE_DROPPED_FN.replace_all(&s, "");
        RE_CUSTOM_PROPERTY.replace_all(&s, "${1}").into_owned()
    })
}

// ── Pass 6: Complex selectors ───────────────────────────────────────────────

static RE_PSEUDO_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)::?(?:not|is|where|has|matches|lang|dir|host|host-context|slotted|part|nth-[a-z-]+|-(?:webkit|moz)-any)\([^()]*\)",
    )
    .unwrap()
});

// Attribute selector glued to a selector and followed by more selector
// syntax; `a[href^="http"] {` → `a {`. Prose like `x[1]` or `a[b]=1` in a
// query string does not match.
static RE_ATTR_SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)([\w*\])])\[[a-z_-][\w-]*(?:\s*[~|^$*]?=\s*(?:"[^"<>]*"|'[^'<>]*'|[\w-]+)(?:\s+[is])?)?\s*\](\s*[{,.:#>+~\[])"#,
    )
    .unwrap()
});

fn strip_complex_selectors(input: &str) -> String {
    let s = RE_PSEUDO_FN.replace_all(input, "");
    RE_ATTR_SELECTOR.replace_all(&s, "${1}${2}").into_owned()
}

// ── Pass 7: Unsupported declarations ────────────────────────────────────────

static RE_VENDOR_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|([;{"'])|\s)\s*-(?:webkit|moz|ms|o)-[a-z-]+\s*:[^;{}<>]*;?"#).unwrap()
});

static RE_MOTION_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:^|([;{"'])|\s)\s*(?:animation|transition|transform|content)(?:-[a-z-]+)?\s*:[^;{}<>]*;"#,
    )
    .unwrap()
});

fn strip_declarations(input: &str) -> String {
    within_bodies(input, |body| {
        let s = RE_VENDOR_DECL.replace_all(body, "${1}");
        RE_MOTION_DECL.replace_all(&s, "${1}").into_owned()
    })
}

// ── Pass 8: Stylesheet and script hrefs ─────────────────────────────────────

static RE_ASSET_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*["'][^"'<>]*\.(?:css|js)(?:[?#][^"'<>]*)?["']"#).unwrap()
});

fn neutralise_asset_hrefs(input: &str) -> String {
    RE_ASSET_HREF.replace_all(input, r#"href="""#).into_owned()
}

// ── Pass 9: Inline style attributes ─────────────────────────────────────────

static RE_STYLE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\s+style\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());

fn strip_inline_styles(input: &str) -> String {
    RE_STYLE_ATTR.replace_all(input, "").into_owned()
}

// ── Pass 10: Fold multi-line declaration bodies ─────────────────────────────

static RE_BODY_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ ]*[\r\n\t]+\s*").unwrap());

/// The renderer's CSS tokenizer is line-sensitive.
fn fold_declaration_bodies(input: &str) -> String {
    within_bodies(input, |body| RE_BODY_BREAK.replace_all(body, " ").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scripts() {
        let s = strip_scripts("<p>a</p><script src=\"x.js\"></script><SCRIPT>alert(1)</Script ><p>b</p>");
        assert_eq!(s, "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_unterminated_script_swallows_rest() {
        assert_eq!(strip_scripts("<p>a</p><script>var x = 1;"), "<p>a</p>");
    }

    #[test]
    fn test_reassembled_script_needs_second_round() {
        let input = "<scr<script></script>ipt>alert(1)</script>";
        assert_eq!(strip_scripts(input), "<script>alert(1)");
        assert!(!sanitize(input).to_lowercase().contains("<script"));
    }

    #[test]
    fn test_strip_style_blocks_and_links() {
        let input = "<head><link rel=\"stylesheet\"\n href=\"a.css\"><style media=\"print\">p{color:red}</style></head>";
        assert_eq!(strip_style_blocks(input), "<head></head>");
    }

    #[test]
    fn test_block_at_rule_one_level() {
        let css = "a{x:1} @media (max-width: 600px) { p { margin: 0 } h1 { y: 2 } } b{z:3}";
        assert_eq!(strip_block_at_rules(css), "a{x:1}  b{z:3}");
        let kf = "@keyframes spin { from { a: 0 } to { a: 1 } }";
        assert_eq!(strip_block_at_rules(kf), "");
    }

    #[test]
    fn test_deeper_nesting_converges() {
        let css = "@media screen { @supports (display: grid) { p { margin: 0 } } }";
        assert!(!sanitize(css).contains('@'));
    }

    #[test]
    fn test_email_is_not_an_at_rule() {
        let html = "<p>mail admin@example.com today</p>";
        assert_eq!(sanitize(html), html);
    }

    #[test]
    fn test_statement_at_rules() {
        assert_eq!(
            strip_statement_at_rules("@import url(\"x.css\") screen; @charset \"utf-8\"; p{}"),
            "  p{}"
        );
    }

    #[test]
    fn test_css_functions() {
        assert_eq!(strip_css_functions("p { width: calc(100% - 2px); }"), "p { width: 0; }");
        assert_eq!(strip_css_functions("p { color: var(--fg); }"), "p { color: 0; }");
        assert_eq!(
            strip_css_functions("p { background: url(a.png) rgba(0,0,0,.5); }"),
            "p { background:  ; }"
        );
        assert_eq!(strip_css_functions("p { --brand: #f00; color: red }"), "p { color: red }");
    }

    #[test]
    fn test_nested_functions_resolve_over_rounds() {
        let out = sanitize("p { width: calc(1px + var(--gap)) }");
        assert_eq!(out, "p { width: 0 }");
    }

    #[test]
    fn test_pseudo_function_selectors() {
        assert_eq!(
            strip_complex_selectors("tr:nth-child(2n+1) td:not(.x) { a: b }"),
            "tr td { a: b }"
        );
    }

    #[test]
    fn test_attribute_selectors() {
        assert_eq!(
            strip_complex_selectors(r#"a[href^="http"] { a: b } input[disabled], p{}"#),
            "a { a: b } input, p{}"
        );
        // Prose and query strings survive.
        let prose = r#"<a href="/q?a[b]=1">see x[1] and items[i] here</a>"#;
        assert_eq!(strip_complex_selectors(prose), prose);
    }

    #[test]
    fn test_declarations() {
        let css = "p { -webkit-transition: all 1s; color: red; animation: spin 2s infinite; transform: rotate(3deg); }";
        assert_eq!(strip_declarations(css), "p { color: red; }");
        assert_eq!(strip_declarations("q::before { content: \"x\"; }"), "q::before { }");
    }

    #[test]
    fn test_declaration_lookalikes_in_body_text_survive() {
        let html = "<p>Table of content: intro; transition: slow; see --verbose: on; and rgb(1,2,3)</p>";
        assert_eq!(sanitize(html), html);
        assert_eq!(
            sanitize("<p>content: a;</p>{ content: b; color: red }"),
            "<p>content: a;</p>{ color: red }"
        );
    }

    #[test]
    fn test_meta_content_attribute_survives() {
        let html = r#"<meta name="viewport" content="width=device-width">"#;
        assert_eq!(sanitize(html), html);
    }

    #[test]
    fn test_asset_hrefs() {
        assert_eq!(
            neutralise_asset_hrefs(r#"<a href="https://cdn.example/app.js?v=2">x</a><a href="/page.html">y</a>"#),
            r#"<a href="">x</a><a href="/page.html">y</a>"#
        );
    }

    #[test]
    fn test_inline_styles() {
        assert_eq!(
            strip_inline_styles(r#"<td style="color: red" class='a' STYLE='x'>1</td>"#),
            r#"<td class='a'>1</td>"#
        );
        assert_eq!(
            strip_inline_styles(r#"<div data-style="keep">"#),
            r#"<div data-style="keep">"#
        );
    }

    #[test]
    fn test_fold_declaration_bodies() {
        assert_eq!(
            fold_declaration_bodies("p {\n\tcolor: red;\n  margin: 0;\n}"),
            "p { color: red; margin: 0; }"
        );
    }

    #[test]
    fn test_sanitize_removes_every_listed_construct() {
        let input = r#"<!DOCTYPE html><html><head>
<script>document.write('x')</script>
<link rel="stylesheet" href="site.css">
<style>@media print { body { color: black } } .a { color: var(--x) }</style>
</head><body style="margin:0"><table><tr><td>1</td></tr></table>
<script type="module">import x from './x.js'</script></body></html>"#;
        let out = sanitize(input);
        let lower = out.to_lowercase();
        assert!(!lower.contains("<script"));
        assert!(!lower.contains("<style"));
        assert!(!lower.contains("<link"));
        assert!(!lower.contains("@media"));
        assert!(!lower.contains("style="));
        assert!(out.contains("<td>1</td>"));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "<p>plain</p>",
            "<script>a</script><style>b</style><p style='x'>c</p>",
            "p {\n color: calc(1px + var(--a));\n}\n@media x { a { b: c } }",
            "<scr<script></script>ipt>x</script>",
            "@media a { @media b { @media c { p { q: r } } } }",
            "<div>{\n\t}</div> a[x][y] { -moz-x: 1 }",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_deeply_nested_at_rules_are_fully_removed() {
        let depth = 120;
        let css = format!(
            "<p>keep</p>{}p {{ q: r }}{}",
            "@media a { ".repeat(depth),
            " }".repeat(depth)
        );
        let once = sanitize(&css);
        assert!(!once.contains('@'), "at-rule left in {once:?}");
        assert_eq!(sanitize(&once), once);
        assert!(once.contains("<p>keep</p>"));
    }

    #[test]
    fn test_plain_markup_passes_through() {
        let html = "<html><body><h1>Report</h1><table><tr><th>A</th></tr><tr><td>1</td></tr></table></body></html>";
        assert_eq!(sanitize(html), html);
    }

    #[test]
    fn test_pass_names_are_unique() {
        let mut names: Vec<_> = PASSES.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PASSES.len());
    }
}
