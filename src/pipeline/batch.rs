//! Grouped, bounded-concurrency fetching.
//!
//! [`BatchFetcher::fetch_all`] splits its input into consecutive groups of at
//! most `group_size` items. Groups run strictly one after another; members of
//! a group run concurrently through `buffered(group_size)`, which both caps the
//! number of in-flight futures and yields results in input order. Peak
//! concurrency is therefore `group_size` no matter how many items there are,
//! and no caller ever has to re-sort.
//!
//! Failure is fail-fast at group granularity: the failing group is allowed to
//! finish (nothing in flight is cancelled), then the first failure in input
//! order is returned as [`BatchAborted`] and later groups are never started.
//! Callers that want best-effort semantics return `Ok` with the error encoded
//! in `R` and use [`std::convert::Infallible`] as the error type.

use crate::config::AssemblyConfig;
use crate::error::BatchAborted;
use crate::progress::{ProgressCallback, Stage};
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

/// Runs a fetch function over many items in sequential, concurrent groups.
#[derive(Clone)]
pub struct BatchFetcher {
    group_size: usize,
    progress: Option<ProgressCallback>,
}

impl BatchFetcher {
    /// A fetcher with the given group size (values below 1 are raised to 1).
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
            progress: None,
        }
    }

    /// A fetcher using `config.group_size` and `config.progress_callback`.
    pub fn from_config(config: &AssemblyConfig) -> Self {
        Self::new(config.group_size).with_progress(config.progress_callback.clone())
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of groups `item_count` items are split into.
    pub fn group_count(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.group_size)
    }

    /// Map `items` through `fetch_one`, preserving input order.
    ///
    /// # Errors
    /// [`BatchAborted`] carrying the first failure (in input order) of the
    /// first group that had one.
    pub async fn fetch_all<T, R, E, F, Fut>(
        &self,
        stage: Stage,
        items: Vec<T>,
        fetch_one: F,
    ) -> Result<Vec<R>, BatchAborted<E>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::error::Error + 'static,
    {
        let total = items.len();
        let group_count = self.group_count(total);
        let progress = self.progress.as_deref();

        if let Some(cb) = progress {
            cb.on_stage_start(stage, total);
        }

        let mut pending = items.into_iter().enumerate();
        let mut results = Vec::with_capacity(total);

        for group_index in 0..group_count {
            let group: Vec<(usize, T)> = pending.by_ref().take(self.group_size).collect();
            let first = group.first().map(|(i, _)| *i).unwrap_or(0);
            debug!(
                "{} group {}/{}: items {}-{}",
                stage,
                group_index + 1,
                group_count,
                first + 1,
                first + group.len()
            );
            if let Some(cb) = progress {
                cb.on_group_start(stage, group_index, group_count, group.len());
            }

            let outcomes: Vec<(usize, Result<R, E>)> = stream::iter(group.into_iter().map(|(idx, item)| {
                let fut = fetch_one(item);
                async move {
                    let outcome = fut.await;
                    if let Some(cb) = progress {
                        cb.on_item_complete(stage, idx);
                    }
                    (idx, outcome)
                }
            }))
            .buffered(self.group_size)
            .collect()
            .await;

            if let Some(cb) = progress {
                cb.on_group_complete(stage, group_index, group_count);
            }

            for (item_index, outcome) in outcomes {
                match outcome {
                    Ok(r) => results.push(r),
                    Err(source) => {
                        return Err(BatchAborted {
                            group_index,
                            item_index,
                            skipped_groups: group_count - group_index - 1,
                            source,
                        });
                    }
                }
            }
        }

        Ok(results)
    }
}
