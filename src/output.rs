//! Values produced by the assembly pipeline.

use crate::error::{ImageError, SanitizeDegraded};
use crate::pipeline::hash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An unprocessed part body, as fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    pub title: String,
    pub raw_markup: String,
}

/// Markup restricted to the sanitizer whitelist.
///
/// After image localization, `markup` is the rewritten markup whose `img`
/// sources point at local files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedFragment {
    pub title: String,
    pub markup: String,
}

/// One embedded image, addressed by the digest of its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub remote_url: String,
    pub content_hash: String,
    pub local_path: PathBuf,
}

impl ImageReference {
    /// Derive the reference for `remote_url` inside `images_dir`.
    pub fn new(remote_url: impl Into<String>, images_dir: &Path) -> Self {
        let remote_url = remote_url.into();
        let content_hash = hash::content_hash(&remote_url);
        let local_path = hash::local_path(images_dir, &content_hash);
        Self {
            remote_url,
            content_hash,
            local_path,
        }
    }

    /// `{content_hash}.jpg`
    pub fn file_name(&self) -> String {
        hash::local_file_name(&self.content_hash)
    }
}

/// The final structure handed to a [`crate::sink::DocumentSink`].
///
/// `fragments` has exactly one entry per input part, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub title: String,
    pub cover_url: Option<String>,
    pub fragments: Vec<SanitizedFragment>,
    /// Distinct images referenced by the fragments, ordered by hash.
    /// Empty unless images were localized.
    pub images: Vec<ImageReference>,
}

impl AssembledDocument {
    /// All fragment markup joined with `\n`.
    pub fn joined_markup(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.markup.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An image that could not be materialized.
///
/// The fragments still point at `local_path`; the file simply does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFailure {
    pub content_hash: String,
    pub remote_url: String,
    pub error: ImageError,
}

/// Counters for one assembly run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStats {
    pub total_parts: usize,
    pub part_groups: usize,
    /// Distinct image hashes found across all parts.
    pub distinct_images: usize,
    /// Images downloaded and written in this run.
    pub images_written: usize,
    /// Images already present on disk and not downloaded again.
    pub images_reused: usize,
    pub images_failed: usize,
    pub duration_ms: u64,
}

/// Everything an assembly run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyOutput {
    pub document: AssembledDocument,
    /// Non-fatal image failures, ordered by hash.
    pub image_failures: Vec<ImageFailure>,
    /// Parts whose markup needed parser recovery.
    pub warnings: Vec<SanitizeDegraded>,
    pub stats: AssemblyStats,
}
