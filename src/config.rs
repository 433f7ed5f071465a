//! Configuration types for story assembly.
//!
//! All assembly behaviour is controlled through [`AssemblyConfig`], built via
//! its [`AssemblyConfigBuilder`]. The sanitizer whitelist is part of the
//! config and is never mutated after `build()`: every call site receives the
//! same immutable [`SanitizePolicy`] value.

use crate::error::StoryError;
use crate::pipeline::sanitize::SanitizePolicy;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Default number of items fetched concurrently within one group.
pub const DEFAULT_GROUP_SIZE: usize = 10;

/// Configuration for assembling a story.
///
/// Built via [`AssemblyConfig::builder()`] or using
/// [`AssemblyConfig::default()`].
///
/// # Example
/// ```rust
/// use storybind::AssemblyConfig;
///
/// let config = AssemblyConfig::builder()
///     .localize_images(true)
///     .group_size(5)
///     .images_dir("book/images")
///     .build()
///     .unwrap();
/// assert!(config.effective_policy().allows_tag("img"));
/// ```
#[derive(Clone)]
pub struct AssemblyConfig {
    /// Download every embedded image and point the markup at the local copy. Default: false.
    ///
    /// Only sinks that render from the local filesystem (e-book packagers)
    /// need this. HTML and PDF output leave remote `src` URLs untouched and
    /// let the viewer or renderer fetch them.
    pub localize_images: bool,

    /// Prepend `<h2>{part title}</h2>` to each part before sanitization. Default: true.
    pub wrap_part_heading: bool,

    /// Items fetched concurrently within one group. Default: 10.
    ///
    /// Groups run one after another, so this is also the peak number of
    /// simultaneous requests against the content host.
    pub group_size: usize,

    /// Directory that receives materialized images. Default: `output/images`.
    ///
    /// When images are localized, [`AssemblyConfigBuilder::build`] makes this
    /// absolute against the working directory, so rewritten `img` sources
    /// resolve wherever the output document is written.
    pub images_dir: PathBuf,

    /// Tag/attribute whitelist used by the sanitizer. Default: base whitelist plus `img`.
    ///
    /// `img` is forced on when `localize_images` is set; see
    /// [`AssemblyConfig::effective_policy`].
    pub sanitize_policy: SanitizePolicy,

    /// Skip the download when `{hash}.jpg` already exists and is non-empty. Default: true.
    pub reuse_existing_images: bool,

    /// Per-request timeout in seconds for [`crate::fetch::HttpFetcher`]. Default: 60.
    pub request_timeout_secs: u64,

    /// Optional observer for per-group progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            localize_images: false,
            wrap_part_heading: true,
            group_size: DEFAULT_GROUP_SIZE,
            images_dir: PathBuf::from("output").join("images"),
            sanitize_policy: SanitizePolicy::default().with_images(),
            reuse_existing_images: true,
            request_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AssemblyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyConfig")
            .field("localize_images", &self.localize_images)
            .field("wrap_part_heading", &self.wrap_part_heading)
            .field("group_size", &self.group_size)
            .field("images_dir", &self.images_dir)
            .field("sanitize_policy", &self.sanitize_policy)
            .field("reuse_existing_images", &self.reuse_existing_images)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AssemblyProgressCallback>"),
            )
            .finish()
    }
}

impl AssemblyConfig {
    /// Create a new builder for `AssemblyConfig`.
    pub fn builder() -> AssemblyConfigBuilder {
        AssemblyConfigBuilder {
            config: Self::default(),
        }
    }

    /// The whitelist actually applied to part markup.
    pub fn effective_policy(&self) -> SanitizePolicy {
        if self.localize_images {
            self.sanitize_policy.clone().with_images()
        } else {
            self.sanitize_policy.clone()
        }
    }
}

/// Builder for [`AssemblyConfig`].
#[derive(Debug)]
pub struct AssemblyConfigBuilder {
    config: AssemblyConfig,
}

impl AssemblyConfigBuilder {
    pub fn localize_images(mut self, v: bool) -> Self {
        self.config.localize_images = v;
        self
    }

    pub fn wrap_part_heading(mut self, v: bool) -> Self {
        self.config.wrap_part_heading = v;
        self
    }

    pub fn group_size(mut self, n: usize) -> Self {
        self.config.group_size = n;
        self
    }

    pub fn images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = dir.into();
        self
    }

    pub fn sanitize_policy(mut self, policy: SanitizePolicy) -> Self {
        self.config.sanitize_policy = policy;
        self
    }

    pub fn reuse_existing_images(mut self, v: bool) -> Self {
        self.config.reuse_existing_images = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<AssemblyConfig, StoryError> {
        let c = &self.config;
        if c.group_size == 0 {
            return Err(StoryError::InvalidConfig("Group size must be ≥ 1".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(StoryError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.localize_images && c.images_dir.as_os_str().is_empty() {
            return Err(StoryError::InvalidConfig(
                "An images directory is required when localizing images".into(),
            ));
        }
        if c.localize_images {
            self.config.images_dir = std::path::absolute(&self.config.images_dir).map_err(|e| {
                StoryError::InvalidConfig(format!(
                    "Cannot resolve images directory {}: {e}",
                    self.config.images_dir.display()
                ))
            })?;
        }
        Ok(self.config)
    }
}
