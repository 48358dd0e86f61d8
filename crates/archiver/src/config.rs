// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backup configuration and the remote store factory

use crate::Result;
use crate::error::BackupError;
use crate::generation::DEFAULT_GENERATION_PREFIX;
use crate::retention::DEFAULT_RETAIN;
use crate::upload::DEFAULT_MAX_IN_FLIGHT_UPLOADS;
use crate::walker::DEFAULT_WALK_CONCURRENCY;
use crate::writer::DEFAULT_COMPRESSION_LEVEL;
use log::debug;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::prefix::PrefixStore;
use object_store::{ClientOptions, path::Path as ObjectPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Request timeout for the S3 client; archives can be large
const S3_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Remote storage configuration
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `s3://bucket[/prefix]`, `file:///path`, or a plain local path
    #[serde(default)]
    pub url: String,

    /// AWS region (for S3)
    #[serde(default)]
    pub region: String,

    /// AWS access key
    #[serde(default)]
    pub access_key: String,

    /// AWS secret key
    #[serde(default)]
    pub secret_key: String,

    /// Custom S3 endpoint (for MinIO, R2, etc.)
    #[serde(default)]
    pub endpoint: String,
}

impl RemoteConfig {
    /// Remote for an S3 bucket name, as given by `S3_BUCKET`
    #[must_use]
    pub fn s3_bucket(bucket: &str) -> Self {
        Self {
            url: format!("s3://{bucket}"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_s3(&self) -> bool {
        self.url.starts_with("s3://")
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &str| if value.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("region", &self.region)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Everything one backup run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Root of the `{full_match|partial_match}/{chain}/{0xADDRESS}` tree
    pub repository_path: PathBuf,

    /// Local directory for archives awaiting upload
    pub export_path: PathBuf,

    /// Chains to back up; every chain found on disk when unset
    pub chains: Option<Vec<String>>,

    /// Number of generations kept by retention
    pub retain: usize,

    pub generation_prefix: String,

    pub max_in_flight_uploads: usize,

    pub walk_concurrency: usize,

    /// Extra attempts per archive upload
    pub upload_retries: usize,

    pub compression_level: i32,

    pub remote: RemoteConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("./repository"),
            export_path: PathBuf::from("./exports"),
            chains: None,
            retain: DEFAULT_RETAIN,
            generation_prefix: DEFAULT_GENERATION_PREFIX.to_string(),
            max_in_flight_uploads: DEFAULT_MAX_IN_FLIGHT_UPLOADS,
            walk_concurrency: DEFAULT_WALK_CONCURRENCY,
            upload_retries: 0,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            remote: RemoteConfig::default(),
        }
    }
}

impl BackupConfig {
    /// Parse a YAML document; fields not given keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load a YAML configuration file (not yet validated)
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| BackupError::ReadEntry {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse a comma-separated chain list, ignoring blanks and repeats
    #[must_use]
    pub fn parse_chains(list: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        list.split(',')
            .map(str::trim)
            .filter(|chain| !chain.is_empty() && seen.insert(*chain))
            .map(str::to_string)
            .collect()
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.remote.url.is_empty() {
            return Err(BackupError::Configuration(
                "a remote is required (S3 bucket or remote URL)".to_string(),
            ));
        }
        self.validate_settings()
    }

    /// Validate everything except the remote
    pub fn validate_settings(&self) -> Result<()> {
        if self.repository_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration(
                "repository_path cannot be empty".to_string(),
            ));
        }
        if self.export_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration(
                "export_path cannot be empty".to_string(),
            ));
        }
        if self.retain == 0 {
            return Err(BackupError::Configuration(
                "retain must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight_uploads == 0 {
            return Err(BackupError::Configuration(
                "max_in_flight_uploads must be greater than 0".to_string(),
            ));
        }
        if self.walk_concurrency == 0 {
            return Err(BackupError::Configuration(
                "walk_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.generation_prefix.is_empty() || self.generation_prefix.contains('/') {
            return Err(BackupError::Configuration(format!(
                "invalid generation_prefix {:?}",
                self.generation_prefix
            )));
        }
        if !(0..=9).contains(&self.compression_level) {
            return Err(BackupError::Configuration(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if let Some(chains) = &self.chains {
            if let Some(bad) = chains.iter().find(|c| !is_chain_dir_name(c)) {
                return Err(BackupError::Configuration(format!("invalid chain id {bad:?}")));
            }
            let mut seen = BTreeSet::new();
            if let Some(repeated) = chains.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(BackupError::Configuration(format!(
                    "chain id {repeated:?} is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

/// A single path segment naming a directory below the match folder
fn is_chain_dir_name(chain: &str) -> bool {
    !chain.is_empty() && chain != "." && chain != ".." && !chain.contains(['/', '\\'])
}

/// Build the object store a remote configuration points at
pub fn build_object_store(remote: &RemoteConfig) -> Result<Arc<dyn ObjectStore>> {
    if remote.is_s3() {
        let url = Url::parse(&remote.url)
            .map_err(|e| BackupError::Configuration(format!("Invalid remote URL {}: {}", remote.url, e)))?;
        let bucket = url
            .host_str()
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| BackupError::Configuration(format!("No bucket in remote URL {}", remote.url)))?;

        let client_options = ClientOptions::new().with_timeout(S3_REQUEST_TIMEOUT);
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_client_options(client_options);

        if !remote.region.is_empty() {
            builder = builder.with_region(&remote.region);
        }
        if !remote.access_key.is_empty() {
            builder = builder.with_access_key_id(&remote.access_key);
        }
        if !remote.secret_key.is_empty() {
            builder = builder.with_secret_access_key(&remote.secret_key);
        }
        if !remote.endpoint.is_empty() {
            builder = builder
                .with_endpoint(&remote.endpoint)
                .with_allow_http(remote.endpoint.starts_with("http://"));
        }

        let store = builder.build()?;
        let prefix = url.path().trim_matches('/');
        debug!("S3 remote: bucket {} prefix {:?}", bucket, prefix);

        if prefix.is_empty() {
            Ok(Arc::new(store))
        } else {
            Ok(Arc::new(PrefixStore::new(store, ObjectPath::from(prefix))))
        }
    } else {
        let path = remote.url.strip_prefix("file://").unwrap_or(&remote.url);
        debug!("Local remote: {}", path);
        std::fs::create_dir_all(path)?;
        Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
    }
}
