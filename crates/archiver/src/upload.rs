// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Finalize-and-upload pipeline
//!
//! Each completed shard writer is moved into its own task, which finalizes
//! the archive, uploads it under the generation prefix and deletes the local
//! copy. The driver keeps scanning the next shard meanwhile. A semaphore caps
//! how many archives are in flight (and therefore on local disk) at once;
//! [`UploadPipeline::join`] is the barrier that collects every outcome.

use crate::Result;
use crate::error::BackupError;
use crate::generation::Generation;
use crate::manifest::ManifestRecord;
use crate::writer::{FinishedArchive, ShardArchiveWriter};
use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use log::{debug, error, info, warn};
use object_store::{ObjectStore, PutPayload};
use object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of archives finalizing or uploading at the same time
pub const DEFAULT_MAX_IN_FLIGHT_UPLOADS: usize = 4;

/// A shard that did not make it into the generation
#[derive(Debug)]
pub struct UploadFailure {
    pub archive: String,
    pub error: BackupError,
}

/// Everything the pipeline did, collected at the barrier
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub records: Vec<ManifestRecord>,
    pub failures: Vec<UploadFailure>,
}

impl UploadSummary {
    #[must_use]
    pub fn uploaded_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_in_bytes).sum()
    }
}

/// Outcome of one task: `Ok(None)` when the shard turned out empty
type TaskOutcome = std::result::Result<Option<ManifestRecord>, UploadFailure>;

pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    generation: Generation,
    permits: Arc<Semaphore>,
    retries: usize,
    tasks: JoinSet<TaskOutcome>,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, generation: Generation) -> Self {
        Self {
            store,
            generation,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT_UPLOADS)),
            retries: 0,
            tasks: JoinSet::new(),
        }
    }

    /// Cap the number of archives in flight (at least one)
    #[must_use]
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Retry a failed put up to `retries` times with exponential backoff
    #[must_use]
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Number of submitted tasks not yet joined
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Hand a completed shard to the pipeline.
    ///
    /// Returns once the task is running; waits only when the in-flight cap
    /// is reached.
    pub async fn submit(&mut self, writer: ShardArchiveWriter) -> Result<()> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackupError::PipelineClosed)?;

        let store = self.store.clone();
        let generation = self.generation.clone();
        let retries = self.retries;

        debug!("Submitting {} ({} entries)", writer.key(), writer.entry_count());
        _ = self.tasks.spawn(async move {
            let _permit = permit;
            finalize_and_upload(store, &generation, retries, writer).await
        });
        Ok(())
    }

    /// Wait for every submitted task and collect the results
    pub async fn join(mut self) -> UploadSummary {
        let mut summary = UploadSummary::default();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(Some(record))) => summary.records.push(record),
                Ok(Ok(None)) => {}
                Ok(Err(failure)) => {
                    error!("Shard {} not uploaded: {}", failure.archive, failure.error);
                    summary.failures.push(failure);
                }
                Err(join_error) => {
                    error!("Upload task failed: {}", join_error);
                    summary.failures.push(UploadFailure {
                        archive: "<unknown>".to_string(),
                        error: BackupError::Task(join_error),
                    });
                }
            }
        }

        info!(
            "Upload barrier reached: {} uploaded ({} bytes), {} failed",
            summary.records.len(),
            summary.uploaded_bytes(),
            summary.failures.len()
        );
        summary
    }
}

async fn finalize_and_upload(
    store: Arc<dyn ObjectStore>,
    generation: &Generation,
    retries: usize,
    writer: ShardArchiveWriter,
) -> TaskOutcome {
    let archive_name = writer.key().archive_name();
    let local = writer.path().to_path_buf();
    let finished = match writer.finalize().await {
        Ok(Some(finished)) => finished,
        Ok(None) => return Ok(None),
        Err(error) => {
            // A half-written archive is never uploaded.
            if let Err(err) = tokio::fs::remove_file(&local).await {
                warn!("Failed to remove partial archive {}: {}", local.display(), err);
            }
            return Err(UploadFailure {
                archive: archive_name,
                error,
            });
        }
    };

    let location = generation.object_path(&archive_name);
    upload_archive(store.as_ref(), &finished, &location, retries)
        .await
        .map(Some)
        .map_err(|error| UploadFailure {
            archive: archive_name,
            error,
        })
}

/// Upload one finished archive to `location` and delete the local file.
///
/// On failure the local file is kept for manual recovery.
pub async fn upload_archive(
    store: &dyn ObjectStore,
    archive: &FinishedArchive,
    location: &Path,
    retries: usize,
) -> Result<ManifestRecord> {
    let content = Bytes::from(tokio::fs::read(&archive.path).await?);
    let size_in_bytes = content.len() as u64;

    let put = || {
        let payload = PutPayload::from(content.clone());
        async move { store.put(location, payload).await }
    };
    _ = put
        .retry(ExponentialBuilder::default().with_max_times(retries))
        .notify(|err, delay| {
            warn!("Retrying upload of {} in {:?}: {}", location, delay, err);
        })
        .await
        .map_err(|source| BackupError::Upload {
            key: location.to_string(),
            source,
        })?;

    info!("Uploaded {} ({} bytes)", location, size_in_bytes);

    if let Err(err) = tokio::fs::remove_file(&archive.path).await {
        warn!(
            "Failed to remove local archive {}: {}",
            archive.path.display(),
            err
        );
    }

    Ok(ManifestRecord {
        path: location.to_string(),
        size_in_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DEFAULT_GENERATION_PREFIX;
    use crate::shard::{AddressPrefix, MatchType, ShardKey};
    use crate::testing::ControlledStore;
    use crate::walker::{RepositoryEntry, RepositoryWalker};
    use futures::{StreamExt, TryStreamExt};
    use object_store::memory::InMemory;
    use std::time::Duration;
    use tempfile::TempDir;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn write_file(root: &std::path::Path, relative: &str, content: &str) -> std::io::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    async fn filled_writer(
        walker: &RepositoryWalker,
        exports: &std::path::Path,
        prefix: u8,
    ) -> std::result::Result<ShardArchiveWriter, Box<dyn std::error::Error>> {
        let key = ShardKey::new(MatchType::Full, "1", AddressPrefix::new(prefix));
        let entries: Vec<RepositoryEntry> = walker.walk(&key).await?.try_collect().await?;
        let mut writer = ShardArchiveWriter::open(key, exports);
        for entry in &entries {
            writer.append(entry).await?;
        }
        Ok(writer)
    }

    #[tokio::test]
    async fn test_pipeline_uploads_and_cleans_up() -> TestResult {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("repository");
        let exports = temp_dir.path().join("exports");
        std::fs::create_dir_all(&exports)?;
        for prefix in ["00", "11", "22"] {
            write_file(&root, &format!("full_match/1/0x{prefix}aa/metadata.json"), prefix)?;
        }

        let store = Arc::new(InMemory::new());
        let generation = Generation::now(DEFAULT_GENERATION_PREFIX);
        let walker = RepositoryWalker::new(&root)?;
        let mut pipeline = UploadPipeline::new(store.clone(), generation.clone()).max_in_flight(1);

        for prefix in [0x00, 0x11, 0x22] {
            let writer = filled_writer(&walker, &exports, prefix).await?;
            pipeline.submit(writer).await?;
        }
        // An empty writer is a no-op.
        pipeline
            .submit(ShardArchiveWriter::open(
                ShardKey::new(MatchType::Full, "1", AddressPrefix::new(0x33)),
                &exports,
            ))
            .await?;

        let summary = pipeline.join().await;
        assert!(summary.failures.is_empty());
        assert_eq!(summary.records.len(), 3);

        for record in &summary.records {
            let bytes = store.get(&Path::from(record.path.as_str())).await?.bytes().await?;
            assert_eq!(bytes.len() as u64, record.size_in_bytes);
            assert!(record.path.starts_with(generation.name()));
        }
        assert_eq!(std::fs::read_dir(&exports)?.count(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_local_file() -> TestResult {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("repository");
        let exports = temp_dir.path().join("exports");
        let remote = temp_dir.path().join("remote");
        std::fs::create_dir_all(&exports)?;
        std::fs::create_dir_all(&remote)?;
        write_file(&root, "full_match/1/0x44aa/metadata.json", "{}")?;

        // A file where the generation directory should be makes every put fail.
        let generation = Generation::now(DEFAULT_GENERATION_PREFIX);
        std::fs::write(remote.join(generation.name()), "in the way")?;
        let store = Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&remote)?);

        let walker = RepositoryWalker::new(&root)?;
        let writer = filled_writer(&walker, &exports, 0x44).await?;
        let local = writer.path().to_path_buf();

        let mut pipeline = UploadPipeline::new(store, generation);
        pipeline.submit(writer).await?;
        let summary = pipeline.join().await;

        assert!(summary.records.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].archive, "full_match.1.44.tar.gz");
        assert!(matches!(summary.failures[0].error, BackupError::Upload { .. }));
        assert!(local.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_submit_waits_only_at_the_in_flight_cap() -> TestResult {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("repository");
        let exports = temp_dir.path().join("exports");
        std::fs::create_dir_all(&exports)?;
        for prefix in ["00", "11", "22"] {
            write_file(&root, &format!("full_match/1/0x{prefix}aa/metadata.json"), prefix)?;
        }

        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(ControlledStore::new().gated_puts(gate.clone()));
        let walker = RepositoryWalker::new(&root)?;
        let mut pipeline = UploadPipeline::new(store.clone(), Generation::now(DEFAULT_GENERATION_PREFIX))
            .max_in_flight(2);

        // Both submits return while their uploads are held.
        for prefix in [0x00, 0x11] {
            let writer = filled_writer(&walker, &exports, prefix).await?;
            tokio::time::timeout(Duration::from_secs(5), pipeline.submit(writer)).await??;
        }
        assert_eq!(pipeline.pending(), 2);

        // The next shard is scanned while the first two are in flight.
        let third = filled_writer(&walker, &exports, 0x22).await?;
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.puts_started() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        assert_eq!(store.list(None).collect::<Vec<_>>().await.len(), 0);

        {
            let submit = pipeline.submit(third);
            tokio::pin!(submit);
            assert!(
                tokio::time::timeout(Duration::from_millis(100), &mut submit)
                    .await
                    .is_err()
            );

            // Releasing one upload frees a slot for the third shard.
            gate.add_permits(1);
            tokio::time::timeout(Duration::from_secs(5), &mut submit).await??;
        }

        gate.add_permits(2);
        let summary = pipeline.join().await;
        assert!(summary.failures.is_empty());
        assert_eq!(summary.records.len(), 3);
        assert_eq!(store.puts_started(), 3);

        Ok(())
    }
}
