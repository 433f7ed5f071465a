//! Story assembly: parts in, one ordered document out.
//!
//! ```text
//! parts ──▶ fetch (grouped, fail-fast) ──▶ sanitize ──┬─────────────────────────────▶ fragments
//!                                                     └▶ extract ─▶ merge by hash ─▶ materialize (grouped, best-effort)
//! ```
//!
//! The pipeline is linear and never reorders parts: the batch fetcher returns
//! bodies in input order and every later step maps over that sequence. Image
//! references are merged only after every part has been extracted, so the
//! shared set is built on one task without locks, and each distinct hash is
//! fetched at most once per run.

use crate::config::AssemblyConfig;
use crate::error::{FetchError, SanitizeDegraded, StoryError};
use crate::fetch::Fetcher;
use crate::output::{AssembledDocument, AssemblyOutput, AssemblyStats, ImageReference, RawPart, SanitizedFragment};
use crate::pipeline::batch::BatchFetcher;
use crate::pipeline::extract::extract_images;
use crate::pipeline::materialize::ImageMaterializer;
use crate::pipeline::sanitize::sanitize_report;
use crate::progress::Stage;
use crate::story::{PartDescriptor, StoryInfo};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Assemble `story` using its title, cover and part list.
pub async fn assemble_story(
    fetcher: &dyn Fetcher,
    story: &StoryInfo,
    config: &AssemblyConfig,
) -> Result<AssemblyOutput, StoryError> {
    assemble(fetcher, &story.title, story.cover.clone(), &story.parts, config).await
}

/// Fetch, sanitize and (optionally) localize every part, in order.
///
/// # Returns
/// `Ok(AssemblyOutput)` with exactly one fragment per part, plus any
/// non-fatal image failures and sanitizer warnings.
///
/// # Errors
/// [`StoryError::PartFetchFailed`] naming the first part (in story order) of
/// the first group that failed. Nothing is written to the images directory
/// in that case: images are only touched after every part has been fetched.
pub async fn assemble(
    fetcher: &dyn Fetcher,
    title: &str,
    cover_url: Option<String>,
    parts: &[PartDescriptor],
    config: &AssemblyConfig,
) -> Result<AssemblyOutput, StoryError> {
    let start = Instant::now();
    let batch = BatchFetcher::from_config(config);
    info!("Assembling '{}': {} parts", title, parts.len());

    // ── Step 1: Fetch part bodies (fail-fast) ────────────────────────────
    let raw_parts = fetch_parts(fetcher, parts, &batch).await?;
    if let Some(cb) = &config.progress_callback {
        cb.on_stage_complete(Stage::Parts, parts.len(), raw_parts.len());
    }

    // ── Step 2: Sanitize ─────────────────────────────────────────────────
    let policy = config.effective_policy();
    let mut warnings = Vec::new();
    let mut fragments: Vec<SanitizedFragment> = Vec::with_capacity(raw_parts.len());

    for (idx, raw) in raw_parts.into_iter().enumerate() {
        let markup = if config.wrap_part_heading {
            format!(
                "<h2>{}</h2>\n{}",
                html_escape::encode_text(&raw.title),
                raw.raw_markup
            )
        } else {
            raw.raw_markup
        };

        let outcome = sanitize_report(&markup, &policy);
        if outcome.is_degraded() {
            let warning = SanitizeDegraded {
                position: idx + 1,
                title: raw.title.clone(),
                parse_errors: outcome.parse_errors.len(),
                first_error: outcome.parse_errors.first().cloned().unwrap_or_default(),
            };
            debug!("{}", warning);
            warnings.push(warning);
        }

        fragments.push(SanitizedFragment {
            title: raw.title,
            markup: outcome.markup,
        });
    }

    // ── Step 3: Localize images ──────────────────────────────────────────
    let mut stats = AssemblyStats {
        total_parts: parts.len(),
        part_groups: batch.group_count(parts.len()),
        ..AssemblyStats::default()
    };
    let mut image_failures = Vec::new();
    let mut images = Vec::new();

    if config.localize_images {
        let mut unique: BTreeMap<String, ImageReference> = BTreeMap::new();
        for fragment in &mut fragments {
            let extracted = extract_images(&fragment.markup, &config.images_dir);
            fragment.markup = extracted.markup;
            for reference in extracted.refs {
                unique.entry(reference.content_hash.clone()).or_insert(reference);
            }
        }
        debug!("{} distinct images across {} parts", unique.len(), fragments.len());

        let report = ImageMaterializer::new(fetcher, &batch)
            .reuse_existing(config.reuse_existing_images)
            .with_progress(config.progress_callback.clone())
            .materialize(&unique)
            .await;

        if !report.failures.is_empty() {
            warn!(
                "{} of {} images could not be materialized",
                report.failures.len(),
                unique.len()
            );
        }

        stats.distinct_images = unique.len();
        stats.images_written = report.written;
        stats.images_reused = report.reused;
        stats.images_failed = report.failures.len();
        image_failures = report.failures;
        images = unique.into_values().collect();
    }

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Assembled '{}': {} fragments in {}ms",
        title,
        fragments.len(),
        stats.duration_ms
    );

    Ok(AssemblyOutput {
        document: AssembledDocument {
            title: title.to_string(),
            cover_url,
            fragments,
            images,
        },
        image_failures,
        warnings,
        stats,
    })
}

async fn fetch_parts(
    fetcher: &dyn Fetcher,
    parts: &[PartDescriptor],
    batch: &BatchFetcher,
) -> Result<Vec<RawPart>, StoryError> {
    let items: Vec<&PartDescriptor> = parts.iter().collect();
    batch
        .fetch_all(Stage::Parts, items, |part| async move {
            let raw_markup = fetcher.fetch_text(&part.source_ref).await?;
            Ok::<_, FetchError>(RawPart {
                title: part.title.clone(),
                raw_markup,
            })
        })
        .await
        .map_err(|aborted| {
            let part = &parts[aborted.item_index];
            warn!(
                "Part #{} '{}' failed; {} later group(s) not started",
                aborted.item_index + 1,
                part.title,
                aborted.skipped_groups
            );
            StoryError::PartFetchFailed {
                position: aborted.item_index + 1,
                part_id: part.id.clone(),
                title: part.title.clone(),
                source: aborted.source,
            }
        })
}
