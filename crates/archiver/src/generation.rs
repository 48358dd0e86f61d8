// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Backup generation naming
//!
//! A generation is one run's set of shard archives plus its manifest, stored
//! under `{prefix}{timestamp}/` where the timestamp is ISO-8601 with `:`
//! replaced by `-` and truncated to seconds, e.g.
//! `sourcify-repository-2024-05-01T12-34-56`. Lexicographic order of these
//! names is chronological order, which retention relies on.

use chrono::{DateTime, SecondsFormat, Utc};
use object_store::path::Path;

/// Key prefix shared by every generation
pub const DEFAULT_GENERATION_PREFIX: &str = "sourcify-repository-";

const NAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// One run's remote prefix, fixed when the run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    name: String,
    started_at: DateTime<Utc>,
}

impl Generation {
    #[must_use]
    pub fn new(prefix: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            name: format!("{}{}", prefix, started_at.format(NAME_TIMESTAMP_FORMAT)),
            started_at,
        }
    }

    /// Generation starting now
    #[must_use]
    pub fn now(prefix: &str) -> Self {
        Self::new(prefix, Utc::now())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds since the Unix epoch
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.started_at.timestamp_millis()
    }

    /// ISO-8601 start time with milliseconds, e.g. `2024-05-01T12:34:56.789Z`
    #[must_use]
    pub fn date_str(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Remote location of a file inside this generation
    #[must_use]
    pub fn object_path(&self, file_name: &str) -> Path {
        Path::from(format!("{}/{}", self.name, file_name))
    }
}
