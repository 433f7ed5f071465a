//! Whitelist-based HTML sanitizer.
//!
//! Part bodies come from a third-party content API and may contain anything.
//! [`sanitize`] parses the markup with an HTML5 parser, then writes back only
//! the elements and attributes the [`SanitizePolicy`] allows:
//!
//! - allowed elements are kept with their allowed attributes;
//! - `script`, `style`, `textarea`, `option` and `noscript` are removed
//!   together with their content;
//! - every other element is unwrapped: the tag goes, its text stays;
//! - `href`/`src`/`srcset` values with a scheme outside the policy (for
//!   example `javascript:`) are dropped.
//!
//! ## Malformed input
//!
//! The HTML5 parser never fails; it recovers from broken markup the way a
//! browser does (closing unclosed tags, re-parenting stray table content,
//! decoding bare `&`). Recovery is lossy in the sense that the output follows
//! the recovered tree rather than the author's intent. [`sanitize_report`]
//! returns the parser's error list so callers can surface that as a
//! [`crate::error::SanitizeDegraded`] warning instead of failing.
//!
//! Output is a fixed point, so `sanitize(sanitize(x)) == sanitize(x)`.
//! Unwrapping a scope boundary such as `button` or `object` can expose
//! nesting the parser never builds (`<p>` inside `<p>`), so the filtered
//! markup is re-parsed and re-written until it stops changing.

use crate::pipeline::markup::{self, Visit};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// Base whitelist of element names.
const BASE_TAGS: &[&str] = &[
    "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6",
    "hgroup", "main", "nav", "section", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "hr", "li", "ol", "p", "pre", "ul", "a", "abbr", "b", "bdi", "bdo", "br", "cite",
    "code", "data", "dfn", "em", "i", "kbd", "mark", "q", "rb", "rp", "rt", "rtc", "ruby", "s",
    "samp", "small", "span", "strong", "sub", "sup", "time", "u", "var", "wbr", "caption", "col",
    "colgroup", "table", "tbody", "td", "tfoot", "th", "thead", "tr",
];

/// Elements removed together with everything inside them.
const DISCARD_WITH_CONTENT: &[&str] = &["script", "style", "textarea", "option", "noscript"];

const IMAGE_ATTRIBUTES: &[&str] = &["src", "srcset", "alt", "title", "width", "height", "loading"];

const URL_ATTRIBUTES: &[&str] = &["href", "src"];

/// Upper bound on re-parse passes; real input settles in one or two.
const MAX_SETTLE_PASSES: usize = 8;

static RE_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*):").unwrap());

/// Immutable tag/attribute whitelist.
///
/// Build one per call site and pass it by reference; nothing in the crate
/// keeps a process-wide default that could be mutated.
///
/// ```rust
/// use storybind::SanitizePolicy;
///
/// let policy = SanitizePolicy::default().with_images().with_tag("center");
/// assert!(policy.allows_tag("img"));
/// assert!(policy.allows_attribute("img", "src"));
/// assert!(!policy.allows_tag("script"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizePolicy {
    tags: BTreeSet<String>,
    attributes: BTreeMap<String, BTreeSet<String>>,
    schemes: BTreeSet<String>,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "a".to_string(),
            ["href", "name", "target"].iter().map(|s| s.to_string()).collect(),
        );
        Self {
            tags: BASE_TAGS.iter().map(|s| s.to_string()).collect(),
            attributes,
            schemes: ["http", "https", "ftp", "mailto", "tel"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SanitizePolicy {
    /// Allow `img` with its usual attributes.
    pub fn with_images(mut self) -> Self {
        self.tags.insert("img".to_string());
        self.attributes
            .entry("img".to_string())
            .or_default()
            .extend(IMAGE_ATTRIBUTES.iter().map(|s| s.to_string()));
        self
    }

    /// Allow one more element (without attributes).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into().to_ascii_lowercase());
        self
    }

    /// Allow `attr` on `tag`. The tag itself must also be allowed.
    pub fn with_attribute(mut self, tag: impl Into<String>, attr: impl Into<String>) -> Self {
        self.attributes
            .entry(tag.into().to_ascii_lowercase())
            .or_default()
            .insert(attr.into().to_ascii_lowercase());
        self
    }

    /// Remove an element from the whitelist.
    pub fn without_tag(mut self, tag: &str) -> Self {
        self.tags.remove(&tag.to_ascii_lowercase());
        self
    }

    pub fn allows_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn allows_attribute(&self, tag: &str, attr: &str) -> bool {
        self.attributes
            .get(tag)
            .is_some_and(|attrs| attrs.contains(attr))
    }

    /// Whether a URL-valued attribute is safe to keep.
    ///
    /// Relative URLs carry no scheme and are always allowed.
    pub fn allows_url(&self, value: &str) -> bool {
        // Browsers ignore embedded whitespace and control characters when
        // reading the scheme ("java\tscript:").
        let compact: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect();
        match RE_SCHEME.captures(&compact) {
            Some(caps) => self.schemes.contains(&caps[1].to_ascii_lowercase()),
            None => true,
        }
    }

    fn allows_srcset(&self, value: &str) -> bool {
        value
            .split(',')
            .filter_map(|candidate| candidate.split_whitespace().next())
            .all(|url| self.allows_url(url))
    }
}

/// Result of sanitizing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOutcome {
    pub markup: String,
    /// Parser error-recovery messages; empty for well-formed input.
    pub parse_errors: Vec<String>,
}

impl SanitizeOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.parse_errors.is_empty()
    }
}

/// Sanitize `markup` against `policy`.
pub fn sanitize(markup: &str, policy: &SanitizePolicy) -> String {
    sanitize_report(markup, policy).markup
}

/// Sanitize `markup` against `policy`, also returning parser recovery errors.
///
/// Only errors from the first parse are reported; later passes read markup
/// this module wrote.
pub fn sanitize_report(markup: &str, policy: &SanitizePolicy) -> SanitizeOutcome {
    let doc = markup::parse(markup);
    let parse_errors = doc.errors.iter().map(|e| e.to_string()).collect();

    let mut current = filter(&doc, policy);
    for _ in 0..MAX_SETTLE_PASSES {
        let next = filter(&markup::parse(&current), policy);
        if next == current {
            break;
        }
        current = next;
    }

    SanitizeOutcome {
        markup: current,
        parse_errors,
    }
}

fn filter(doc: &Html, policy: &SanitizePolicy) -> String {
    markup::render(doc, |element| {
        let name = element.name();
        if DISCARD_WITH_CONTENT.contains(&name) {
            return Visit::Drop;
        }
        if !policy.allows_tag(name) {
            return Visit::Unwrap;
        }
        let attrs = element
            .attrs()
            .filter(|(attr, value)| {
                policy.allows_attribute(name, attr)
                    && match *attr {
                        "srcset" => policy.allows_srcset(value),
                        a if URL_ATTRIBUTES.contains(&a) => policy.allows_url(value),
                        _ => true,
                    }
            })
            .map(|(attr, value)| (attr, Cow::Borrowed(value)))
            .collect();
        Visit::Keep(attrs)
    })
}
