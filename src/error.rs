//! Error types for the storybind library.
//!
//! Two tiers of failure exist because text and images are held to different
//! standards:
//!
//! * [`StoryError`] is **fatal**: the story cannot be assembled at all (the
//!   metadata lookup failed, a part could not be fetched, a sink could not
//!   write its artifact). Returned as `Err(StoryError)` from the top-level
//!   functions. A missing part silently breaks the narrative, so part-fetch
//!   failures always land here.
//!
//! * [`ImageError`] and [`SanitizeDegraded`] are **non-fatal**: one image could
//!   not be fetched or transcoded, or one part's markup needed parser
//!   recovery. Collected in [`crate::output::AssemblyOutput`] next to a
//!   complete document. A failed image leaves a dangling local reference in
//!   the markup rather than aborting the run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the storybind library.
#[derive(Debug, Error)]
pub enum StoryError {
    // ── Story metadata ────────────────────────────────────────────────────
    /// The story id could not be parsed from the user input.
    #[error("Invalid story id '{input}': expected a numeric id such as 292169908 or 292169908-some-title")]
    InvalidStoryId { input: String },

    /// The metadata lookup for the story failed or returned garbage.
    #[error("Cannot find story '{story_id}': {reason}")]
    StoryNotFound { story_id: String, reason: String },

    // ── Part fetching ─────────────────────────────────────────────────────
    /// A part body could not be fetched; no partial document is produced.
    ///
    /// `position` is the 1-based position of the part in the story.
    #[error("Failed to fetch part #{position} '{title}' (id {part_id}): {source}")]
    PartFetchFailed {
        position: usize,
        part_id: String,
        title: String,
        #[source]
        source: FetchError,
    },

    // ── Output ────────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external converter needed by a sink is not installed.
    #[error("Converter '{program}' not found in PATH.\n{hint}")]
    ConverterUnavailable { program: String, hint: String },

    /// The external converter ran but reported failure.
    #[error("Converter '{program}' failed ({status}): {stderr}")]
    ConverterFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The EPUB container could not be written.
    #[error("Failed to package e-book '{path}': {detail}")]
    EbookPackaging { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Whether a failed fetch is worth retrying.
///
/// The core never retries (one attempt per item); the classification is
/// reported so callers and fetch collaborators can decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchErrorKind {
    /// Timeouts, connection resets, HTTP 429 and 5xx.
    Transient,
    /// Invalid URLs, other HTTP 4xx, unreadable bodies.
    Permanent,
}

/// A remote fetch failed.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?} fetch error for '{url}': {detail}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
    pub detail: String,
}

impl FetchError {
    pub fn transient(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FetchErrorKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FetchErrorKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

/// A non-fatal failure for a single image.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ImageError {
    /// The image could not be downloaded.
    #[error("image fetch failed: {0}")]
    Fetch(FetchError),

    /// The payload could not be decoded or re-encoded as JPEG.
    #[error("image decode failed: {detail}")]
    Decode { detail: String },

    /// The materialized file could not be written.
    #[error("image write to '{path}' failed: {detail}")]
    Write { path: PathBuf, detail: String },
}

/// A part's markup needed parser error recovery during sanitization.
///
/// The fragment is still produced from the recovered tree; this is reported so
/// that lossy recovery is never silent.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Part #{position} '{title}': markup recovered from {parse_errors} parse error(s), first: {first_error}")]
pub struct SanitizeDegraded {
    pub position: usize,
    pub title: String,
    pub parse_errors: usize,
    pub first_error: String,
}

/// A fail-fast batch stopped at a failed item.
///
/// Every member of the failing group ran to completion; groups after it were
/// never started.
#[derive(Debug, Error)]
#[error("batch aborted at item {item_index} (group {group_index}, {skipped_groups} group(s) skipped): {source}")]
pub struct BatchAborted<E: std::error::Error + 'static> {
    /// 0-based index of the failing group.
    pub group_index: usize,
    /// 0-based index of the first failing item in the whole input.
    pub item_index: usize,
    /// Number of groups that were never started.
    pub skipped_groups: usize,
    #[source]
    pub source: E,
}
