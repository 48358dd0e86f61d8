// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Generation manifest
//!
//! The manifest lists every archive a run uploaded. It is published twice:
//! inside the generation (`{generation}/manifest.json`) and at the bucket root
//! (`manifest.json`), where it always describes the latest run.

use crate::Result;
use crate::error::BackupError;
use crate::generation::Generation;
use bytes::Bytes;
use log::{info, warn};
use object_store::ObjectStore;
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

const MANIFEST_DESCRIPTION: &str =
    "Manifest file for when the Sourcify file repository was uploaded";

/// One uploaded archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    /// Remote key, `{generation}/{archive}`
    pub path: String,
    pub size_in_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub description: String,
    /// Generation start, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub date_str: String,
    pub files: Vec<ManifestRecord>,
}

impl Manifest {
    /// Build the manifest for `generation`; records are sorted by path
    #[must_use]
    pub fn new(generation: &Generation, mut files: Vec<ManifestRecord>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            description: MANIFEST_DESCRIPTION.to_string(),
            timestamp: generation.timestamp_millis(),
            date_str: generation.date_str(),
            files,
        }
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_in_bytes).sum()
    }

    /// Read a published manifest back from the store
    pub async fn fetch(store: &dyn ObjectStore, location: &Path) -> Result<Self> {
        let bytes = store.get(location).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read the root-level manifest of the latest run
    pub async fn fetch_latest(store: &dyn ObjectStore) -> Result<Self> {
        Self::fetch(store, &Path::from(MANIFEST_FILE_NAME)).await
    }
}

/// Uploads a manifest under its generation and as the latest pointer
pub struct ManifestPublisher {
    store: Arc<dyn ObjectStore>,
    staging_dir: PathBuf,
}

impl ManifestPublisher {
    /// `staging_dir` receives a local copy while the upload is in progress
    pub fn new(store: Arc<dyn ObjectStore>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
        }
    }

    /// Publish `manifest` and return the remote locations written.
    ///
    /// The staged copy is removed whether or not the uploads succeed.
    pub async fn publish(&self, generation: &Generation, manifest: &Manifest) -> Result<Vec<Path>> {
        let json = serde_json::to_vec_pretty(manifest)?;

        let staging = self.staging_dir.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&staging, &json).await?;

        let locations = vec![
            generation.object_path(MANIFEST_FILE_NAME),
            Path::from(MANIFEST_FILE_NAME),
        ];
        let uploaded = self.upload(&locations, Bytes::from(json)).await;

        if let Err(err) = tokio::fs::remove_file(&staging).await {
            warn!("Failed to remove staged manifest {}: {}", staging.display(), err);
        }

        uploaded.map(|()| locations)
    }

    async fn upload(&self, locations: &[Path], bytes: Bytes) -> Result<()> {
        for location in locations {
            _ = self
                .store
                .put(location, bytes.clone().into())
                .await
                .map_err(|source| BackupError::Upload {
                    key: location.to_string(),
                    source,
                })?;
            info!("Uploaded {}", location);
        }
        Ok(())
    }
}
