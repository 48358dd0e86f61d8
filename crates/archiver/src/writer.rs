// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Streaming tar+gzip writer for one shard
//!
//! ```text
//! file content → tar entry → gzip → BufWriter → local file
//! ```
//!
//! Nothing touches the disk until the first entry is appended, so a shard
//! without files never leaves an empty archive behind. Each appended file is
//! read whole and written as one entry; the archive itself is never held in
//! memory.

use crate::error::BackupError;
use crate::shard::ShardKey;
use crate::walker::RepositoryEntry;
use crate::Result;
use async_compression::tokio::write::GzipEncoder;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_tar as tar;

/// Default gzip compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 6;

type ArchiveStream = tar::Builder<GzipEncoder<BufWriter<File>>>;

/// Writer for one shard archive
pub struct ShardArchiveWriter {
    key: ShardKey,
    path: PathBuf,
    compression_level: i32,
    stream: Option<ArchiveStream>,
    entry_count: usize,
    uncompressed_size: u64,
}

/// A shard archive that has been completely written and synced to disk
#[derive(Debug, Clone)]
pub struct FinishedArchive {
    pub key: ShardKey,
    pub path: PathBuf,
    pub entry_count: usize,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

impl FinishedArchive {
    #[must_use]
    pub fn archive_name(&self) -> String {
        self.key.archive_name()
    }
}

impl ShardArchiveWriter {
    /// Prepare a writer for `key` whose archive will live in `export_dir`.
    ///
    /// No file is created here.
    #[must_use]
    pub fn open(key: ShardKey, export_dir: &Path) -> Self {
        let path = export_dir.join(key.archive_name());
        Self {
            key,
            path,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            stream: None,
            entry_count: 0,
            uncompressed_size: 0,
        }
    }

    /// Set the gzip compression level (0-9)
    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    #[must_use]
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    /// Local path of the archive (which may not exist yet)
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// True until the first entry has been appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Append one repository file as an archive entry.
    ///
    /// The file is read completely before anything is written, so a read
    /// failure never leaves a truncated entry in the archive.
    pub async fn append(&mut self, entry: &RepositoryEntry) -> Result<()> {
        let (content, mtime) = read_entry(entry.path()).await.map_err(|source| {
            BackupError::ReadEntry {
                path: entry.path().to_path_buf(),
                source,
            }
        })?;

        let archive_path = entry.archive_path();
        let append_error = |source| BackupError::AppendEntry {
            archive: self.key.archive_name(),
            entry: archive_path.display().to_string(),
            source,
        };

        let stream = match &mut self.stream {
            Some(stream) => stream,
            slot @ None => {
                let stream = create_stream(&self.path, self.compression_level)
                    .await
                    .map_err(append_error)?;
                slot.insert(stream)
            }
        };

        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_cksum();

        stream
            .append_data(&mut header, &archive_path, content.as_slice())
            .await
            .map_err(append_error)?;

        self.entry_count += 1;
        self.uncompressed_size += content.len() as u64;
        Ok(())
    }

    /// Finish the archive: tar trailer, gzip trailer, flush, fsync.
    ///
    /// Returns `None` for a writer that never received an entry.
    pub async fn finalize(self) -> Result<Option<FinishedArchive>> {
        let Some(stream) = self.stream else {
            return Ok(None);
        };
        let archive = self.key.archive_name();
        let finalize_error = |source| BackupError::FinalizeArchive {
            archive: archive.clone(),
            source,
        };

        let mut encoder = stream.into_inner().await.map_err(finalize_error)?;
        encoder.shutdown().await.map_err(finalize_error)?;
        let file = encoder.into_inner().into_inner();
        file.sync_all().await.map_err(finalize_error)?;

        let compressed_size = file.metadata().await.map_err(finalize_error)?.len();

        debug!(
            "Finalized {}: {} entries, {} bytes compressed from {} bytes",
            archive, self.entry_count, compressed_size, self.uncompressed_size
        );

        Ok(Some(FinishedArchive {
            key: self.key,
            path: self.path,
            entry_count: self.entry_count,
            uncompressed_size: self.uncompressed_size,
            compressed_size,
        }))
    }

    /// Drop a partially written archive and remove its file
    pub async fn abandon(self) {
        let had_file = self.stream.is_some();
        drop(self.stream);
        if had_file {
            if let Err(err) = tokio::fs::remove_file(&self.path).await {
                warn!(
                    "Failed to remove abandoned archive {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}

async fn create_stream(path: &Path, level: i32) -> std::io::Result<ArchiveStream> {
    let file = File::create(path).await?;
    let encoder = GzipEncoder::with_quality(BufWriter::new(file), gzip_level(level));
    Ok(tar::Builder::new(encoder))
}

async fn read_entry(path: &Path) -> std::io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path).await?;
    let metadata = file.metadata().await?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_secs());

    let mut content = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or_default());
    _ = file.read_to_end(&mut content).await?;
    Ok((content, mtime))
}

/// Gzip level 0-9 as async_compression::Level; out of range values are clamped
fn gzip_level(level: i32) -> async_compression::Level {
    async_compression::Level::Precise(level.clamp(0, 9))
}
