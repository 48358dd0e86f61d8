// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for repository backup operations

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    ConfigurationFile(#[from] serde_yaml_ng::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadEntry {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append {entry} to archive {archive}: {source}")]
    AppendEntry {
        archive: String,
        entry: String,
        source: std::io::Error,
    },

    #[error("Failed to finalize archive {archive}: {source}")]
    FinalizeArchive {
        archive: String,
        source: std::io::Error,
    },

    #[error("Failed to upload {key}: {source}")]
    Upload {
        key: String,
        source: object_store::Error,
    },

    #[error("Failed to prune generation {generation}: {source}")]
    Retention {
        generation: String,
        source: object_store::Error,
    },

    #[error("Upload pipeline is closed")]
    PipelineClosed,

    #[error("Upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("No archives were uploaded")]
    NothingArchived,
}

impl From<String> for BackupError {
    fn from(s: String) -> Self {
        BackupError::Configuration(s)
    }
}
