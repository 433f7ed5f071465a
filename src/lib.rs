//! # storybind
//!
//! Assemble a multi-part web story into one clean, self-contained document.
//!
//! ## Why this crate?
//!
//! Serialized fiction is published as dozens or hundreds of separate parts,
//! each an HTML body of uneven quality with images hot-linked from a CDN.
//! Reading it offline means fetching every part without hammering the
//! server, stripping the markup down to something an e-reader will accept,
//! and pulling every image into a local, deduplicated store. This crate does
//! exactly that and hands the result to a sink (HTML, PDF, EPUB or MOBI).
//!
//! ## Pipeline Overview
//!
//! ```text
//! story id
//!  │
//!  ├─ 1. Metadata   one API call → title, cover, ordered part list
//!  ├─ 2. Fetch      part bodies in bounded groups (fail-fast, order kept)
//!  ├─ 3. Sanitize   whitelist tags / attributes / URL schemes
//!  ├─ 4. Extract    img src → images/{md5(url)}.jpg
//!  ├─ 5. Localize   one download per distinct image, transcode to JPEG
//!  └─ 6. Sink       HTML file, PDF, EPUB or MOBI
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storybind::{assemble_story, AssemblyConfig, HttpFetcher, StoryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AssemblyConfig::builder().localize_images(true).build()?;
//!     let fetcher = HttpFetcher::from_config(&config)?;
//!
//!     let story = StoryClient::default().fetch_story(&fetcher, "292169908").await?;
//!     let output = assemble_story(&fetcher, &story, &config).await?;
//!
//!     println!("{}", output.document.joined_markup());
//!     eprintln!("{} images, {} failed",
//!         output.stats.distinct_images,
//!         output.stats.images_failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storybind` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! storybind = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod story;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble, assemble_story};
pub use config::{AssemblyConfig, AssemblyConfigBuilder, DEFAULT_GROUP_SIZE};
pub use error::{BatchAborted, FetchError, FetchErrorKind, ImageError, SanitizeDegraded, StoryError};
pub use fetch::{FetchedBinary, Fetcher, HttpFetcher};
pub use output::{
    AssembledDocument, AssemblyOutput, AssemblyStats, ImageFailure, ImageReference, RawPart, SanitizedFragment,
};
pub use pipeline::batch::BatchFetcher;
pub use pipeline::extract::{extract_images, Extracted};
pub use pipeline::hash::content_hash;
pub use pipeline::materialize::{ImageMaterializer, MaterializeReport};
pub use pipeline::sanitize::{sanitize, sanitize_report, SanitizeOutcome, SanitizePolicy};
pub use progress::{AssemblyProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use sink::{DocumentSink, EbookProfile, EbookSink, HtmlSink, PdfSink};
pub use story::{parse_story_id, PartDescriptor, StoryClient, StoryInfo};
