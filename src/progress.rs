//! Progress-callback trait for batch and assembly events.
//!
//! Inject an [`Arc<dyn AssemblyProgressCallback>`] via
//! [`crate::config::AssemblyConfigBuilder::progress_callback`] to observe the
//! pipeline as it walks through its fetch groups. Events are a side channel
//! only: nothing in the assembled document depends on them.
//!
//! # Example
//!
//! ```rust
//! use storybind::{AssemblyConfig, AssemblyProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct GroupCounter {
//!     groups: AtomicUsize,
//! }
//!
//! impl AssemblyProgressCallback for GroupCounter {
//!     fn on_group_start(&self, stage: Stage, group_index: usize, _groups: usize, items: usize) {
//!         self.groups.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: group {} ({items} items)", group_index + 1);
//!     }
//! }
//!
//! let counter = Arc::new(GroupCounter { groups: AtomicUsize::new(0) });
//!
//! let config = AssemblyConfig::builder()
//!     .progress_callback(counter as Arc<dyn AssemblyProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The batched stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Fetching part bodies (fail-fast).
    Parts,
    /// Fetching and materializing images (best-effort).
    Images,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Parts => f.write_str("parts"),
            Stage::Images => f.write_str("images"),
        }
    }
}

/// Called by the pipeline as it processes each stage.
///
/// Groups within a stage run strictly one after another, so group events
/// arrive in order. `on_item_complete` may be called concurrently from within
/// a group; implementations must protect shared state with atomics or locks.
/// All methods default to no-ops.
pub trait AssemblyProgressCallback: Send + Sync {
    /// Called once before the first group of a stage.
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        let _ = (stage, total_items);
    }

    /// Called before the members of a group are started.
    ///
    /// # Arguments
    /// * `group_index`: 0-based group index
    /// * `group_count`: total groups in this stage
    /// * `item_count`: members in this group (the last group may be smaller)
    fn on_group_start(&self, stage: Stage, group_index: usize, group_count: usize, item_count: usize) {
        let _ = (stage, group_index, group_count, item_count);
    }

    /// Called after every member of a group has resolved or failed.
    fn on_group_complete(&self, stage: Stage, group_index: usize, group_count: usize) {
        let _ = (stage, group_index, group_count);
    }

    /// Called as each individual item resolves.
    fn on_item_complete(&self, stage: Stage, item_index: usize) {
        let _ = (stage, item_index);
    }

    /// Called for every image that could not be materialized.
    fn on_image_error(&self, remote_url: &str, error: &str) {
        let _ = (remote_url, error);
    }

    /// Called once after the last group of a stage.
    ///
    /// `succeeded` counts items that produced a usable result.
    fn on_stage_complete(&self, stage: Stage, total_items: usize, succeeded: usize) {
        let _ = (stage, total_items, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AssemblyProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AssemblyConfig`].
pub type ProgressCallback = Arc<dyn AssemblyProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        groups: Mutex<Vec<(Stage, usize, usize)>>,
    }

    impl AssemblyProgressCallback for Recorder {
        fn on_group_start(&self, stage: Stage, group_index: usize, _count: usize, items: usize) {
            self.groups.lock().unwrap().push((stage, group_index, items));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Parts, 3);
        cb.on_group_start(Stage::Parts, 0, 1, 3);
        cb.on_item_complete(Stage::Parts, 2);
        cb.on_group_complete(Stage::Parts, 0, 1);
        cb.on_image_error("https://x/a.png", "HTTP 404");
        cb.on_stage_complete(Stage::Images, 3, 2);
    }

    #[test]
    fn recorder_sees_group_events() {
        let rec = Recorder::default();
        rec.on_group_start(Stage::Images, 1, 2, 4);
        assert_eq!(rec.groups.lock().unwrap().as_slice(), &[(Stage::Images, 1, 4)]);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Parts.to_string(), "parts");
        assert_eq!(Stage::Images.to_string(), "images");
    }
}
