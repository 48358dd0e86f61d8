// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backup driver
//!
//! One run walks match types × chains × address prefixes in a fixed order,
//! fills one archive per shard and hands it to the upload pipeline without
//! waiting for the upload. After the upload barrier the manifest is published
//! and old generations are pruned.

use crate::Result;
use crate::config::{BackupConfig, build_object_store};
use crate::error::BackupError;
use crate::generation::Generation;
use crate::manifest::{Manifest, ManifestPublisher};
use crate::retention::{RetentionManager, RetentionReport};
use crate::shard::{MatchType, ShardKey};
use crate::upload::{UploadFailure, UploadPipeline};
use crate::walker::{RepositoryEntry, RepositoryWalker};
use crate::writer::ShardArchiveWriter;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, error, info, warn};
use object_store::ObjectStore;
use std::sync::Arc;

/// Outcome of a successful run
#[derive(Debug)]
pub struct RunSummary {
    pub generation: Generation,
    pub manifest: Manifest,
    /// Shards abandoned while archiving, by archive name
    pub shard_failures: Vec<String>,
    pub upload_failures: Vec<UploadFailure>,
    /// Chain entries that belong to no shard
    pub skipped_entries: usize,
    /// Directories that could not be listed
    pub walk_errors: usize,
    /// `None` when the retention sweep could not list generations
    pub retention: Option<RetentionReport>,
}

impl RunSummary {
    #[must_use]
    pub fn shards_uploaded(&self) -> usize {
        self.manifest.files.len()
    }

    #[must_use]
    pub fn bytes_uploaded(&self) -> u64 {
        self.manifest.total_size()
    }

    /// True when every shard made it into the generation
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shard_failures.is_empty() && self.upload_failures.is_empty() && self.walk_errors == 0
    }
}

#[derive(Debug, Default)]
struct ScanStats {
    shard_failures: Vec<String>,
    skipped_entries: usize,
    walk_errors: usize,
}

pub struct Archiver {
    config: BackupConfig,
    store: Arc<dyn ObjectStore>,
}

impl Archiver {
    /// Validate `config` and connect to its remote
    pub fn from_config(config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let store = build_object_store(&config.remote)?;
        Ok(Self { config, store })
    }

    /// Use an already constructed store; `config.remote` is ignored
    pub fn with_store(config: BackupConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate_settings()?;
        Ok(Self { config, store })
    }

    #[must_use]
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    #[must_use]
    pub fn retention_manager(&self) -> RetentionManager {
        RetentionManager::new(self.store.clone())
            .prefix(self.config.generation_prefix.clone())
            .keep(self.config.retain)
    }

    /// Run a backup starting now
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_at(Utc::now()).await
    }

    /// Run a backup whose generation is named after `started_at`
    pub async fn run_at(&self, started_at: DateTime<Utc>) -> Result<RunSummary> {
        let generation = Generation::new(&self.config.generation_prefix, started_at);
        info!(
            "Backing up {} as {}",
            self.config.repository_path.display(),
            generation.name()
        );

        tokio::fs::create_dir_all(&self.config.export_path).await?;

        let walker = RepositoryWalker::new(&self.config.repository_path)?
            .with_concurrency(self.config.walk_concurrency);
        let chains = match &self.config.chains {
            Some(chains) => chains.clone(),
            None => walker.discover_chains().await?,
        };
        info!("Chains: {}", chains.join(", "));

        let mut pipeline = UploadPipeline::new(self.store.clone(), generation.clone())
            .max_in_flight(self.config.max_in_flight_uploads)
            .retries(self.config.upload_retries);
        let mut stats = ScanStats::default();

        for match_type in MatchType::ALL {
            for chain_id in &chains {
                let index = match walker.index_chain(match_type, chain_id).await {
                    Ok(index) => index,
                    Err(err) => {
                        error!("Skipping {}/{}: {}", match_type, chain_id, err);
                        stats.walk_errors += 1;
                        continue;
                    }
                };
                stats.skipped_entries += index.skipped();
                if index.is_empty() {
                    debug!("Nothing to archive in {}/{}", match_type, chain_id);
                    continue;
                }

                info!("Archiving {}/{}: {} shards", match_type, chain_id, index.len());
                for prefix in index.prefixes() {
                    let entries = walker.walk_index(&index, prefix);
                    let Some(writer) = self.archive_shard(index.key(prefix), entries, &mut stats).await
                    else {
                        continue;
                    };
                    if writer.is_empty() {
                        debug!("Shard {} is empty", writer.key());
                        continue;
                    }
                    pipeline.submit(writer).await?;
                }
            }
        }

        let uploads = pipeline.join().await;
        if uploads.records.is_empty() {
            error!("No archives were uploaded for {}", generation.name());
            return Err(BackupError::NothingArchived);
        }

        let manifest = Manifest::new(&generation, uploads.records);
        _ = ManifestPublisher::new(self.store.clone(), &self.config.export_path)
            .publish(&generation, &manifest)
            .await?;

        let retention = match self.retention_manager().prune().await {
            Ok(report) => Some(report),
            Err(err) => {
                error!("Retention sweep failed: {}", err);
                None
            }
        };

        let summary = RunSummary {
            generation,
            manifest,
            shard_failures: stats.shard_failures,
            upload_failures: uploads.failures,
            skipped_entries: stats.skipped_entries,
            walk_errors: stats.walk_errors,
            retention,
        };
        info!(
            "Backup {} complete: {} archives, {} bytes, {} failed",
            summary.generation.name(),
            summary.shards_uploaded(),
            summary.bytes_uploaded(),
            summary.shard_failures.len() + summary.upload_failures.len()
        );
        Ok(summary)
    }

    /// Retention sweep without a backup
    pub async fn prune(&self) -> Result<RetentionReport> {
        self.retention_manager().prune().await
    }

    /// Generations in the remote store, newest first
    pub async fn list_generations(&self) -> Result<Vec<String>> {
        self.retention_manager().list_generations().await
    }

    /// Manifest of the most recent run
    pub async fn latest_manifest(&self) -> Result<Manifest> {
        Manifest::fetch_latest(self.store.as_ref()).await
    }

    /// Stream one shard's entries into a writer.
    ///
    /// Returns `None` when the shard was abandoned.
    async fn archive_shard(
        &self,
        key: ShardKey,
        mut entries: BoxStream<'_, Result<RepositoryEntry>>,
        stats: &mut ScanStats,
    ) -> Option<ShardArchiveWriter> {
        let mut writer = ShardArchiveWriter::open(key, &self.config.export_path)
            .compression_level(self.config.compression_level);

        while let Some(item) = entries.next().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("{}", err);
                    stats.walk_errors += 1;
                    continue;
                }
            };
            if let Err(err) = writer.append(&entry).await {
                error!("Abandoning shard {}: {}", writer.key(), err);
                stats.shard_failures.push(writer.key().archive_name());
                writer.abandon().await;
                return None;
            }
        }

        Some(writer)
    }
}
