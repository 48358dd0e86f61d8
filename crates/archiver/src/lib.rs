// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Sharded streaming backup of a verified-source repository
//!
//! The repository tree `{full_match|partial_match}/{chainId}/{0xADDRESS}/**`
//! is partitioned by the first address byte into at most 256 shards per
//! chain. Each shard is streamed into its own `tar.gz` archive, uploaded to
//! an object store under a timestamped generation prefix, and listed in a
//! manifest. Only the most recent generations are retained.
//!
//! # Architecture
//!
//! - **resolve**: pure mapping from a repository path to a `ShardKey`
//! - **RepositoryWalker**: bounded-concurrency traversal of one shard
//! - **ShardArchiveWriter**: lazily created gzip'd tar stream per shard
//! - **UploadPipeline**: finalize + upload tasks overlapping the next scan
//! - **ManifestPublisher**: `{generation}/manifest.json` and `manifest.json`
//! - **RetentionManager**: keeps the newest N generations
//! - **Archiver**: the run loop tying these together
//!
//! # Remote layout
//!
//! ```text
//! manifest.json
//! sourcify-repository-2024-05-01T12-34-56/manifest.json
//! sourcify-repository-2024-05-01T12-34-56/full_match.1.aa.tar.gz
//! sourcify-repository-2024-05-01T12-34-56/partial_match.1.cc.tar.gz
//! ```
//!
//! # Usage
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use archiver::{Archiver, BackupConfig, RemoteConfig};
//!
//! let config = BackupConfig {
//!     repository_path: "/data/repository".into(),
//!     remote: RemoteConfig::s3_bucket("sourcify-backup"),
//!     ..BackupConfig::default()
//! };
//! let summary = Archiver::from_config(config)?.run().await?;
//! log::info!("uploaded {} archives", summary.shards_uploaded());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod generation;
mod manifest;
mod retention;
mod run;
mod shard;
#[cfg(test)]
mod testing;
mod upload;
mod walker;
mod writer;

pub use config::{BackupConfig, RemoteConfig, build_object_store};
pub use error::BackupError;
pub use generation::{DEFAULT_GENERATION_PREFIX, Generation};
pub use manifest::{MANIFEST_FILE_NAME, Manifest, ManifestPublisher, ManifestRecord};
pub use retention::{DEFAULT_DELETE_PAGE_SIZE, DEFAULT_RETAIN, RetentionManager, RetentionReport};
pub use run::{Archiver, RunSummary};
pub use shard::{AddressPrefix, MatchType, Resolution, ShardKey, SkipReason, resolve};
pub use upload::{
    DEFAULT_MAX_IN_FLIGHT_UPLOADS, UploadFailure, UploadPipeline, UploadSummary, upload_archive,
};
pub use walker::{ChainIndex, DEFAULT_WALK_CONCURRENCY, RepositoryEntry, RepositoryWalker};
pub use writer::{DEFAULT_COMPRESSION_LEVEL, FinishedArchive, ShardArchiveWriter};

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;
