// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use archiver::{Archiver, BackupError};

use crate::common::format_size;

/// List generations newest first, then summarize the latest manifest
pub async fn list_command(archiver: &Archiver, limit: Option<usize>, out: &mut impl Write) -> Result<()> {
    let generations = archiver
        .list_generations()
        .await
        .context("Failed to list generations")?;

    if generations.is_empty() {
        writeln!(out, "No backup generations")?;
    }
    for generation in generations.iter().take(limit.unwrap_or(usize::MAX)) {
        writeln!(out, "{generation}")?;
    }

    match archiver.latest_manifest().await {
        Ok(manifest) => {
            writeln!(out)?;
            writeln!(out, "Latest manifest: {}", manifest.date_str)?;
            writeln!(
                out,
                "  {} archives, {}",
                manifest.files.len(),
                format_size(manifest.total_size())
            )?;
        }
        Err(BackupError::ObjectStore(object_store::Error::NotFound { .. })) => {
            writeln!(out, "No manifest published")?;
        }
        Err(err) => return Err(err).context("Failed to read the latest manifest"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archiver::BackupConfig;
    use object_store::memory::InMemory;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn archiver(temp_dir: &TempDir) -> Result<Archiver> {
        let root = temp_dir.path().join("repository");
        let address = root.join("partial_match/5/0xcafe");
        std::fs::create_dir_all(&address)?;
        std::fs::write(address.join("metadata.json"), "{}")?;

        Ok(Archiver::with_store(
            BackupConfig {
                repository_path: root,
                export_path: temp_dir.path().join("exports"),
                ..BackupConfig::default()
            },
            Arc::new(InMemory::new()),
        )?)
    }

    #[tokio::test]
    async fn test_list_empty_store() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archiver = archiver(&temp_dir)?;

        let mut out = Vec::new();
        list_command(&archiver, None, &mut out).await?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("No backup generations"));
        assert!(text.contains("No manifest published"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_after_run() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archiver = archiver(&temp_dir)?;
        let summary = archiver.run().await?;

        let mut out = Vec::new();
        list_command(&archiver, Some(10), &mut out).await?;
        let text = String::from_utf8(out)?;

        assert!(text.starts_with(summary.generation.name()));
        assert!(text.contains(&format!("Latest manifest: {}", summary.manifest.date_str)));
        assert!(text.contains("1 archives"));
        Ok(())
    }
}
