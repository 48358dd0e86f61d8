// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Retention of backup generations
//!
//! Generations are the top-level "folders" of the bucket whose names start
//! with the generation prefix. The newest `keep` of them survive; everything
//! older is deleted object by object, one listing page at a time. A
//! generation that fails to delete is reported and the sweep continues.

use crate::Result;
use crate::error::BackupError;
use crate::generation::DEFAULT_GENERATION_PREFIX;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, error, info};
use object_store::ObjectStore;
use object_store::path::Path;
use std::sync::Arc;

/// Number of generations kept by default
pub const DEFAULT_RETAIN: usize = 3;

/// Objects deleted per batch (the S3 DeleteObjects limit)
pub const DEFAULT_DELETE_PAGE_SIZE: usize = 1000;

/// What a prune pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Generations left in place, newest first
    pub kept: Vec<String>,
    /// Generations removed
    pub deleted: Vec<String>,
    /// Generations that could not be removed completely
    pub failed: Vec<String>,
    /// Objects removed across all deleted generations
    pub objects_deleted: usize,
}

pub struct RetentionManager {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    keep: usize,
    page_size: usize,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_GENERATION_PREFIX.to_string(),
            keep: DEFAULT_RETAIN,
            page_size: DEFAULT_DELETE_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Generation names in the store, newest first
    pub async fn list_generations(&self) -> Result<Vec<String>> {
        let listing = self.store.list_with_delimiter(None).await?;

        let mut generations: Vec<String> = listing
            .common_prefixes
            .iter()
            .map(|p| p.as_ref().to_string())
            .filter(|name| name.starts_with(&self.prefix))
            .collect();
        generations.sort_by(|a, b| b.cmp(a));
        Ok(generations)
    }

    /// Delete every generation beyond the `keep` most recent.
    ///
    /// Fails only when the generations cannot be listed at all.
    pub async fn prune(&self) -> Result<RetentionReport> {
        let mut generations = self.list_generations().await?;
        let mut report = RetentionReport::default();

        if generations.len() <= self.keep {
            debug!(
                "{} generations, retaining up to {}: nothing to prune",
                generations.len(),
                self.keep
            );
            report.kept = generations;
            return Ok(report);
        }

        let stale = generations.split_off(self.keep);
        report.kept = generations;

        for generation in stale {
            match self.delete_generation(&generation).await {
                Ok(count) => {
                    info!("Deleted generation {} ({} objects)", generation, count);
                    report.objects_deleted += count;
                    report.deleted.push(generation);
                }
                Err(err) => {
                    error!("{}", err);
                    report.failed.push(generation);
                }
            }
        }

        Ok(report)
    }

    /// Delete all objects under one generation, page by page
    pub async fn delete_generation(&self, generation: &str) -> Result<usize> {
        let retention_error = |source| BackupError::Retention {
            generation: generation.to_string(),
            source,
        };
        let prefix = Path::from(generation);
        let mut pages = self.store.list(Some(&prefix)).chunks(self.page_size);
        let mut deleted = 0;

        while let Some(page) = pages.next().await {
            let locations: Vec<Path> = page
                .into_iter()
                .map(|meta| meta.map(|meta| meta.location))
                .collect::<std::result::Result<_, _>>()
                .map_err(retention_error)?;

            debug!("Deleting {} objects from {}", locations.len(), generation);
            let removed: Vec<Path> = self
                .store
                .delete_stream(stream::iter(locations.into_iter().map(Ok)).boxed())
                .try_collect()
                .await
                .map_err(retention_error)?;
            deleted += removed.len();
        }

        Ok(deleted)
    }
}
