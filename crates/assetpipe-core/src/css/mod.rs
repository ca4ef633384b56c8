//! Stylesheet processing.
//!
//! - `sass`: SCSS / indented Sass via grass
//! - [`process_css`]: lightningcss parse, nesting lowering, vendor prefixes,
//!   optional minification
//! - `url(...)` collection and rewriting, so referenced images and fonts can
//!   be emitted as resources and linked by their public URL

pub mod sass;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

/// CSS processing options.
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    /// Enable minification.
    pub minify: bool,
    /// Source file path, for error messages.
    pub filename: Option<String>,
    /// Browser targets for prefixing and lowering.
    pub targets: Option<Browsers>,
}

/// Process CSS with lightningcss.
///
/// Nesting is always lowered and vendor prefixes are always added for the
/// target browsers; whitespace is only stripped when `minify` is set.
pub fn process_css(source: &str, options: &CssOptions) -> Result<String, CssError> {
    let filename = options.filename.as_deref().unwrap_or("input.css");

    let mut stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| CssError::Parse(format!("{filename}: {e}")))?;

    let browsers = options.targets.unwrap_or_else(default_browser_targets);

    stylesheet
        .minify(MinifyOptions {
            targets: Targets::from(browsers),
            ..Default::default()
        })
        .map_err(|e| CssError::Transform(format!("{filename}: {e}")))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets: Targets::from(browsers),
            ..Default::default()
        })
        .map_err(|e| CssError::Print(format!("{filename}: {e}")))?;

    Ok(output.code)
}

/// Default browser targets: Chrome 80+, Firefox 75+, Safari 13+, Edge 80+.
#[must_use]
pub fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#)
            .unwrap_or_else(|e| unreachable!("url pattern: {e}"))
    })
}

fn captured_url<'a>(caps: &Captures<'a>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map_or("", |m| m.as_str())
}

/// Whether a `url(...)` argument points at a file next to the stylesheet.
///
/// Data URIs, absolute URLs, root-relative paths and fragment-only
/// references are left to the browser.
#[must_use]
pub fn is_local_url(url: &str) -> bool {
    let url = url.trim();
    !(url.is_empty()
        || url.starts_with('#')
        || url.starts_with('/')
        || url.contains("://")
        || url.starts_with("data:")
        || url.starts_with("about:"))
}

/// Strip a `?query` or `#fragment` suffix (`font.woff?v=3`, `font.svg#icons`).
#[must_use]
pub fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Local `url(...)` references in order of first appearance.
#[must_use]
pub fn collect_urls(css: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for caps in url_regex().captures_iter(css) {
        let url = captured_url(&caps).trim();
        if is_local_url(url) && !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// Replace `url(...)` references for which `rewrite` returns a new target.
///
/// The query and fragment of the original reference are kept.
pub fn rewrite_urls(css: &str, rewrite: impl Fn(&str) -> Option<String>) -> String {
    url_regex()
        .replace_all(css, |caps: &Captures<'_>| {
            let url = captured_url(caps).trim();
            match rewrite(url) {
                Some(target) => {
                    let suffix = &url[url_path(url).len()..];
                    let full = format!("{target}{suffix}");
                    if full.contains(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'')) {
                        format!("url(\"{}\")", full.replace('"', "\\\""))
                    } else {
                        format!("url({full})")
                    }
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// CSS processing error.
#[derive(Debug)]
pub enum CssError {
    /// Failed to parse CSS.
    Parse(String),
    /// Failed to transform CSS.
    Transform(String),
    /// Failed to print CSS.
    Print(String),
}

impl std::fmt::Display for CssError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CssError::Parse(msg) => write!(f, "CSS parse error: {msg}"),
            CssError::Transform(msg) => write!(f, "CSS transform error: {msg}"),
            CssError::Print(msg) => write!(f, "CSS print error: {msg}"),
        }
    }
}

impl std::error::Error for CssError {}
