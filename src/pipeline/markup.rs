//! Serialising a parsed HTML fragment back to markup.
//!
//! Both the sanitizer and the image extractor parse a fragment with
//! `scraper`, decide per element what to keep, and write the tree back out.
//! The writer lives here so both stages produce byte-identical markup for
//! identical trees, which is what makes `sanitize` idempotent and lets the
//! extractor run on sanitized output without disturbing it.
//!
//! Output rules:
//! - text is entity-escaped (`&`, `<`, `>`), attribute values are
//!   double-quoted and escaped, attributes are written sorted by name so the
//!   output does not depend on the parser's attribute storage order;
//! - void elements are self-closed (`<br />`) so fragments are also
//!   well-formed XHTML for e-book packaging;
//! - comments, doctypes and processing instructions are dropped;
//! - a leading newline inside `pre`/`textarea`/`listing` is doubled, because
//!   the parser swallows the first one on the way back in.

use ego_tree::NodeRef;
use scraper::node::{Element, Node};
use scraper::Html;
use std::borrow::Cow;

/// What to do with one element while writing the tree.
pub(crate) enum Visit<'a> {
    /// Write the element with exactly these attributes, then its children.
    Keep(Vec<(&'a str, Cow<'a, str>)>),
    /// Skip the tag itself but write its children.
    Unwrap,
    /// Skip the element and everything inside it.
    Drop,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const NEWLINE_SENSITIVE: &[&str] = &["pre", "textarea", "listing"];

/// Parse `markup` as a body fragment.
pub(crate) fn parse(markup: &str) -> Html {
    Html::parse_fragment(markup)
}

/// Write every top-level node of `fragment`, consulting `visit` per element.
pub(crate) fn render<'a, F>(fragment: &'a Html, mut visit: F) -> String
where
    F: FnMut(&'a Element) -> Visit<'a>,
{
    let mut out = String::new();
    for child in fragment.root_element().children() {
        write_node(child, &mut visit, &mut out);
    }
    out
}

fn write_node<'a, F>(node: NodeRef<'a, Node>, visit: &mut F, out: &mut String)
where
    F: FnMut(&'a Element) -> Visit<'a>,
{
    match node.value() {
        Node::Text(text) => {
            out.push_str(&html_escape::encode_text(&**text));
        }
        Node::Element(element) => match visit(element) {
            Visit::Drop => {}
            Visit::Unwrap => {
                for child in node.children() {
                    write_node(child, visit, out);
                }
            }
            Visit::Keep(mut attrs) => {
                attrs.sort_by(|a, b| a.0.cmp(b.0));
                let name = element.name();
                out.push('<');
                out.push_str(name);
                for (attr, value) in attrs {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(&value));
                    out.push('"');
                }
                if VOID_ELEMENTS.contains(&name) {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                if NEWLINE_SENSITIVE.contains(&name) && starts_with_newline(node) {
                    out.push('\n');
                }
                for child in node.children() {
                    write_node(child, visit, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        },
        // Comments, doctypes, processing instructions and fragment roots.
        _ => {}
    }
}

fn starts_with_newline(node: NodeRef<'_, Node>) -> bool {
    node.first_child()
        .and_then(|child| child.value().as_text().map(|t| t.starts_with('\n')))
        .unwrap_or(false)
}

/// Every attribute of `element`, unfiltered.
pub(crate) fn all_attrs(element: &Element) -> Vec<(&str, Cow<'_, str>)> {
    element
        .attrs()
        .map(|(name, value)| (name, Cow::Borrowed(value)))
        .collect()
}
