//! Image extraction: point every `img` at its content-addressed local file.
//!
//! Pure syntax plus hashing; nothing is downloaded here. Every `img` with a
//! non-empty `src` gets `src` rewritten to `{images_dir}/{md5(src)}.jpg` and
//! its `srcset` removed (a remote `srcset` would bypass the local copy). All
//! references are returned, duplicates included: deduplication happens when
//! the caller merges the references of every part.

use crate::output::ImageReference;
use crate::pipeline::markup::{self, Visit};
use std::borrow::Cow;
use std::path::Path;

/// Rewritten markup plus every image reference found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub markup: String,
    /// In document order, duplicates included.
    pub refs: Vec<ImageReference>,
}

/// Rewrite `img` sources in `markup` to local paths under `images_dir`.
pub fn extract_images(markup: &str, images_dir: &Path) -> Extracted {
    let doc = markup::parse(markup);
    let mut refs = Vec::new();

    let markup = markup::render(&doc, |element| {
        if element.name() != "img" {
            return Visit::Keep(markup::all_attrs(element));
        }
        let Some(src) = element.attr("src").map(str::trim).filter(|s| !s.is_empty()) else {
            return Visit::Keep(markup::all_attrs(element));
        };

        let reference = ImageReference::new(src, images_dir);
        let local = reference.local_path.to_string_lossy().into_owned();
        refs.push(reference);

        let attrs = element
            .attrs()
            .filter(|(name, _)| *name != "srcset")
            .map(|(name, value)| {
                if name == "src" {
                    (name, Cow::Owned(local.clone()))
                } else {
                    (name, Cow::Borrowed(value))
                }
            })
            .collect();
        Visit::Keep(attrs)
    });

    Extracted { markup, refs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::hash::content_hash;
    use std::path::PathBuf;

    #[test]
    fn rewrites_src_to_local_path() {
        let out = extract_images(
            r#"<p>before<img alt="a" src="https://x/a.png" />after</p>"#,
            Path::new("imgs"),
        );
        assert_eq!(
            out.markup,
            r#"<p>before<img alt="a" src="imgs/65a004509271862ef0b1a4d1a0734f64.jpg" />after</p>"#
        );
        assert_eq!(out.refs.len(), 1);
        assert_eq!(out.refs[0].remote_url, "https://x/a.png");
        assert_eq!(out.refs[0].content_hash, content_hash("https://x/a.png"));
        assert_eq!(
            out.refs[0].local_path,
            PathBuf::from("imgs/65a004509271862ef0b1a4d1a0734f64.jpg")
        );
    }

    #[test]
    fn duplicates_are_all_returned() {
        let out = extract_images(
            r#"<img src="https://x/a.png" /><p>x</p><img src="https://x/a.png" /><img src="https://x/b.png" />"#,
            Path::new("imgs"),
        );
        let urls: Vec<_> = out.refs.iter().map(|r| r.remote_url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/a.png", "https://x/a.png", "https://x/b.png"]);
        assert_eq!(out.refs[0].local_path, out.refs[1].local_path);
        assert_ne!(out.refs[0].local_path, out.refs[2].local_path);
    }

    #[test]
    fn srcset_is_removed_on_localized_images() {
        let out = extract_images(
            r#"<img src="https://x/a.png" srcset="https://x/a@2x.png 2x" />"#,
            Path::new("i"),
        );
        assert!(!out.markup.contains("srcset"));
        assert!(!out.markup.contains("https://"));
    }

    #[test]
    fn img_without_src_is_left_alone() {
        let out = extract_images(r#"<p><img alt="none" /></p>"#, Path::new("i"));
        assert!(out.refs.is_empty());
        assert_eq!(out.markup, r#"<p><img alt="none" /></p>"#);
    }

    #[test]
    fn markup_without_images_is_unchanged() {
        let sanitized = "<h2>Chapter 1</h2>\n<p>Hello &amp; welcome</p>";
        let out = extract_images(sanitized, Path::new("i"));
        assert_eq!(out.markup, sanitized);
        assert!(out.refs.is_empty());
    }
}
