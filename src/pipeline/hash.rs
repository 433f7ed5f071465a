//! Content addressing: image URL → stable local filename.
//!
//! The digest is taken over the *reference string*, not the payload. The same
//! URL always collapses to one file, even across parts, and can be deduplicated
//! before anything is downloaded. Two different URLs serving identical bytes
//! still produce two files.

use std::path::{Path, PathBuf};

/// File extension of the canonical raster format (JPEG).
pub const CANONICAL_EXTENSION: &str = "jpg";

/// MIME type of the canonical raster format.
pub const CANONICAL_MIME: &str = "image/jpeg";

/// Hex-encoded 128-bit MD5 digest of `reference`.
pub fn content_hash(reference: &str) -> String {
    format!("{:x}", md5::compute(reference.as_bytes()))
}

/// `{digest}.jpg`
pub fn local_file_name(digest: &str) -> String {
    format!("{digest}.{CANONICAL_EXTENSION}")
}

/// Full path of the materialized file for `digest` inside `images_dir`.
pub fn local_path(images_dir: &Path, digest: &str) -> PathBuf {
    images_dir.join(local_file_name(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(content_hash("https://x/a.png"), "65a004509271862ef0b1a4d1a0734f64");
        assert_eq!(content_hash("https://x/b.png"), "a0d58858c67323bd55ce7ceadb8625eb");
    }

    #[test]
    fn digest_is_deterministic_hex() {
        let a = content_hash("https://img.example/cover.webp?size=large");
        let b = content_hash("https://img.example/cover.webp?size=large");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn distinct_references_get_distinct_files() {
        // Same bytes behind both URLs would still not be merged.
        assert_ne!(
            content_hash("https://cdn-a.example/same.jpg"),
            content_hash("https://cdn-b.example/same.jpg")
        );
    }

    #[test]
    fn local_path_uses_canonical_extension() {
        let p = local_path(Path::new("out/images"), "abc123");
        assert_eq!(p, PathBuf::from("out/images/abc123.jpg"));
    }
}
