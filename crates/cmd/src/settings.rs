// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Command-line and environment settings layered over the config file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use archiver::{BackupConfig, RemoteConfig};
use clap::Args;

/// Settings that override the configuration file
#[derive(Debug, Default, Args)]
pub struct Settings {
    /// Repository root containing full_match/ and partial_match/
    #[arg(long, env = "REPOSITORY_PATH")]
    pub repository_path: Option<PathBuf>,

    /// Directory for archives awaiting upload
    #[arg(long, env = "EXPORT_PATH")]
    pub export_path: Option<PathBuf>,

    /// Comma-separated chain ids (default: every chain on disk)
    #[arg(long, env = "CHAINS")]
    pub chains: Option<String>,

    /// S3 bucket receiving the backups
    #[arg(long, env = "S3_BUCKET", conflicts_with = "remote_url")]
    pub bucket: Option<String>,

    /// Remote store URL: s3://bucket[/prefix], file:///path, or a local path
    #[arg(long, env = "BACKUP_REMOTE_URL")]
    pub remote_url: Option<String>,

    #[arg(long, env = "S3_REGION")]
    pub region: Option<String>,

    #[arg(long, env = "S3_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Custom S3 endpoint (MinIO, R2, ...)
    #[arg(long, env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Number of generations to keep
    #[arg(long, env = "BACKUP_RETAIN")]
    pub retain: Option<usize>,

    /// Generation name prefix
    #[arg(long)]
    pub generation_prefix: Option<String>,

    /// Archives finalizing or uploading at once
    #[arg(long)]
    pub max_in_flight_uploads: Option<usize>,

    /// Address directories traversed at once
    #[arg(long)]
    pub walk_concurrency: Option<usize>,

    /// Extra attempts for a failed archive upload
    #[arg(long)]
    pub upload_retries: Option<usize>,

    /// Gzip level, 0-9
    #[arg(long)]
    pub compression_level: Option<i32>,
}

impl Settings {
    /// Apply every given setting on top of `config`
    pub fn apply(self, mut config: BackupConfig) -> Result<BackupConfig> {
        if let Some(path) = self.repository_path {
            config.repository_path = path;
        }
        if let Some(path) = self.export_path {
            config.export_path = path;
        }
        if let Some(chains) = self.chains {
            let chains = BackupConfig::parse_chains(&chains);
            if chains.is_empty() {
                bail!("CHAINS is set but lists no chain");
            }
            config.chains = Some(chains);
        }

        match (self.bucket, self.remote_url) {
            (Some(_), Some(_)) => bail!("give either a bucket or a remote URL, not both"),
            (Some(bucket), None) => config.remote.url = RemoteConfig::s3_bucket(&bucket).url,
            (None, Some(url)) => config.remote.url = url,
            (None, None) => {}
        }
        if let Some(region) = self.region {
            config.remote.region = region;
        }
        if let Some(key) = self.access_key {
            config.remote.access_key = key;
        }
        if let Some(secret) = self.secret_key {
            config.remote.secret_key = secret;
        }
        if let Some(endpoint) = self.endpoint {
            config.remote.endpoint = endpoint;
        }

        if let Some(retain) = self.retain {
            config.retain = retain;
        }
        if let Some(prefix) = self.generation_prefix {
            config.generation_prefix = prefix;
        }
        if let Some(max) = self.max_in_flight_uploads {
            config.max_in_flight_uploads = max;
        }
        if let Some(concurrency) = self.walk_concurrency {
            config.walk_concurrency = concurrency;
        }
        if let Some(retries) = self.upload_retries {
            config.upload_retries = retries;
        }
        if let Some(level) = self.compression_level {
            config.compression_level = level;
        }

        Ok(config)
    }
}

/// Build the effective configuration: file (or defaults), then settings
pub fn load_config(config_file: Option<&Path>, settings: Settings) -> Result<BackupConfig> {
    let base = match config_file {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            BackupConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?
        }
        None => BackupConfig::default(),
    };

    let config = settings.apply(base)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn settings(args: &[&str]) -> Result<Settings> {
        let args = std::iter::once("repository-backup").chain(args.iter().copied());
        Ok(TestCli::try_parse_from(args)?.settings)
    }

    #[test]
    fn test_bucket_becomes_s3_remote() -> Result<()> {
        let config = Settings {
            bucket: Some("sourcify-backup".to_string()),
            region: Some("eu-central-1".to_string()),
            chains: Some("1,5, 137".to_string()),
            ..Settings::default()
        }
        .apply(BackupConfig::default())?;

        assert_eq!(config.remote.url, "s3://sourcify-backup");
        assert_eq!(config.remote.region, "eu-central-1");
        assert_eq!(
            config.chains,
            Some(vec!["1".to_string(), "5".to_string(), "137".to_string()])
        );
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_flags_override_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.yaml");
        std::fs::write(
            &path,
            "repository_path: /data/repository\nretain: 7\nremote:\n  url: s3://from-file\n  region: us-east-2\n",
        )?;

        let config = load_config(
            Some(&path),
            Settings {
                retain: Some(2),
                endpoint: Some("http://localhost:9000".to_string()),
                ..Settings::default()
            },
        )?;

        assert_eq!(config.repository_path, PathBuf::from("/data/repository"));
        assert_eq!(config.retain, 2);
        assert_eq!(config.remote.url, "s3://from-file");
        assert_eq!(config.remote.region, "us-east-2");
        assert_eq!(config.remote.endpoint, "http://localhost:9000");
        Ok(())
    }

    #[test]
    fn test_missing_remote_is_rejected() {
        assert!(load_config(None, Settings::default()).is_err());
    }

    #[test]
    fn test_zero_retain_is_rejected() {
        let result = load_config(
            None,
            Settings {
                remote_url: Some("file:///tmp/remote".to_string()),
                retain: Some(0),
                ..Settings::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_chain_list_is_rejected() {
        let result = Settings {
            chains: Some(" , ".to_string()),
            ..Settings::default()
        }
        .apply(BackupConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_flag_parsing() -> Result<()> {
        let parsed = settings(&[
            "--remote-url",
            "s3://bucket/nightly",
            "--compression-level",
            "9",
            "--walk-concurrency",
            "8",
        ])?;
        assert_eq!(parsed.remote_url.as_deref(), Some("s3://bucket/nightly"));
        assert_eq!(parsed.compression_level, Some(9));
        assert_eq!(parsed.walk_concurrency, Some(8));

        assert!(settings(&["--bucket", "a", "--remote-url", "s3://b"]).is_err());
        Ok(())
    }
}
