//! Image materialization: download each distinct image once, store it as JPEG.
//!
//! Input is the merged reference set keyed by content hash, so a URL that
//! appears in many parts is fetched exactly once. Images go through the same
//! [`BatchFetcher`] grouping as parts, but with the opposite failure policy:
//! every image is attempted, and failures are collected instead of aborting.
//! A failed image leaves its markup pointing at a file that was never written.
//!
//! ## Canonical format
//!
//! Everything on disk is JPEG. A response declaring `image/jpeg` is written
//! verbatim; anything else is decoded and re-encoded (`spawn_blocking`, since
//! decoding is CPU-bound). The URL's file extension is ignored.
//!
//! ## Idempotence
//!
//! Files are written to `{hash}.jpg.part` and renamed into place, so a
//! `{hash}.jpg` on disk is always complete. With `reuse_existing` set, such a
//! file short-circuits the download; otherwise it is overwritten with the
//! bytes the same pipeline produces.

use crate::error::ImageError;
use crate::fetch::{FetchedBinary, Fetcher};
use crate::output::{ImageFailure, ImageReference};
use crate::pipeline::batch::BatchFetcher;
use crate::pipeline::hash::CANONICAL_MIME;
use crate::progress::{ProgressCallback, Stage};
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one materialization pass.
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    pub written: usize,
    pub reused: usize,
    /// Ordered by content hash.
    pub failures: Vec<ImageFailure>,
}

impl MaterializeReport {
    pub fn succeeded(&self) -> usize {
        self.written + self.reused
    }
}

enum ImageOutcome {
    Written,
    Reused,
    Failed(ImageFailure),
}

/// Downloads and stores images through a [`Fetcher`].
pub struct ImageMaterializer<'a> {
    fetcher: &'a dyn Fetcher,
    batch: &'a BatchFetcher,
    reuse_existing: bool,
    progress: Option<ProgressCallback>,
}

impl<'a> ImageMaterializer<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, batch: &'a BatchFetcher) -> Self {
        Self {
            fetcher,
            batch,
            reuse_existing: true,
            progress: None,
        }
    }

    pub fn reuse_existing(mut self, v: bool) -> Self {
        self.reuse_existing = v;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Materialize every reference in `refs`, one fetch per distinct hash.
    pub async fn materialize(&self, refs: &BTreeMap<String, ImageReference>) -> MaterializeReport {
        let total = refs.len();
        if total == 0 {
            return MaterializeReport::default();
        }

        let dirs: std::collections::BTreeSet<&Path> =
            refs.values().filter_map(|r| r.local_path.parent()).collect();
        for dir in dirs {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("Cannot create images directory {}: {}", dir.display(), e);
            }
        }

        info!("Materializing {} distinct images", total);
        let items: Vec<&ImageReference> = refs.values().collect();
        let outcomes = match self
            .batch
            .fetch_all(Stage::Images, items, |reference| async move {
                Ok::<_, Infallible>(self.materialize_one(reference).await)
            })
            .await
        {
            Ok(outcomes) => outcomes,
            Err(aborted) => match aborted.source {},
        };

        let mut report = MaterializeReport::default();
        for outcome in outcomes {
            match outcome {
                ImageOutcome::Written => report.written += 1,
                ImageOutcome::Reused => report.reused += 1,
                ImageOutcome::Failed(failure) => report.failures.push(failure),
            }
        }

        if let Some(cb) = &self.progress {
            cb.on_stage_complete(Stage::Images, total, report.succeeded());
        }
        info!(
            "Images: {} written, {} reused, {} failed",
            report.written,
            report.reused,
            report.failures.len()
        );
        report
    }

    async fn materialize_one(&self, reference: &ImageReference) -> ImageOutcome {
        let path = &reference.local_path;

        if self.reuse_existing {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                if meta.is_file() && meta.len() > 0 {
                    debug!("Reusing {}", path.display());
                    return ImageOutcome::Reused;
                }
            }
        }

        match self.fetch_canonical(reference).await {
            Ok(()) => ImageOutcome::Written,
            Err(error) => {
                warn!("Image {} failed: {}", reference.remote_url, error);
                if let Some(cb) = &self.progress {
                    cb.on_image_error(&reference.remote_url, &error.to_string());
                }
                ImageOutcome::Failed(ImageFailure {
                    content_hash: reference.content_hash.clone(),
                    remote_url: reference.remote_url.clone(),
                    error,
                })
            }
        }
    }

    async fn fetch_canonical(&self, reference: &ImageReference) -> Result<(), ImageError> {
        let FetchedBinary {
            bytes,
            content_type,
        } = self
            .fetcher
            .fetch_binary(&reference.remote_url)
            .await
            .map_err(ImageError::Fetch)?;

        let bytes = if is_canonical(content_type.as_deref()) {
            bytes
        } else {
            debug!(
                "Transcoding {} ({}) to JPEG",
                reference.remote_url,
                content_type.as_deref().unwrap_or("no content type")
            );
            tokio::task::spawn_blocking(move || transcode_to_jpeg(&bytes))
                .await
                .map_err(|e| ImageError::Decode {
                    detail: format!("transcode task panicked: {e}"),
                })?
                .map_err(|e| ImageError::Decode {
                    detail: e.to_string(),
                })?
        };

        write_atomic(&reference.local_path, &bytes)
            .await
            .map_err(|e| ImageError::Write {
                path: reference.local_path.clone(),
                detail: e.to_string(),
            })
    }
}

/// Whether a declared content type is already the canonical format.
///
/// Compares the MIME essence case-insensitively; parameters such as
/// `; charset=binary` are ignored.
pub fn is_canonical(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case(CANONICAL_MIME))
        .unwrap_or(false)
}

/// Decode any supported raster format and re-encode it as baseline JPEG.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn transcode_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
    Ok(buf)
}

/// Write through `{path}.part` and rename; the temp file never outlives a failure.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);

    let result = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([0, 128, 255, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn canonical_content_types() {
        assert!(is_canonical(Some("image/jpeg")));
        assert!(is_canonical(Some("IMAGE/JPEG; charset=binary")));
        assert!(!is_canonical(Some("image/png")));
        assert!(!is_canonical(Some("image/jpg")));
        assert!(!is_canonical(None));
    }

    #[test]
    fn png_is_transcoded_to_jpeg() {
        let jpeg = transcode_to_jpeg(&png_bytes()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        let back = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((back.width(), back.height()), (4, 3));
    }

    #[test]
    fn transcoding_is_deterministic() {
        let png = png_bytes();
        assert_eq!(transcode_to_jpeg(&png).unwrap(), transcode_to_jpeg(&png).unwrap());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(transcode_to_jpeg(b"definitely not an image").is_err());
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jpg");
        write_atomic(&path, b"bytes").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        assert!(!dir.path().join("abc.jpg.part").exists());
    }

    #[tokio::test]
    async fn failed_rename_removes_part_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("abc.jpg");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        assert!(write_atomic(&path, b"bytes").await.is_err());
        assert!(!dir.path().join("abc.jpg.part").exists());
    }
}
