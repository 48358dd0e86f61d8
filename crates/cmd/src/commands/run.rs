// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use archiver::{Archiver, RetentionReport};

use crate::common::format_size;

/// Back up the repository as a new generation and prune old ones
pub async fn run_command(archiver: &Archiver, out: &mut impl Write) -> Result<()> {
    let summary = archiver.run().await.context("Backup failed")?;

    writeln!(out, "Generation: {}", summary.generation.name())?;
    writeln!(
        out,
        "Uploaded {} archives ({})",
        summary.shards_uploaded(),
        format_size(summary.bytes_uploaded())
    )?;
    if summary.skipped_entries > 0 {
        writeln!(out, "Skipped {} non-address entries", summary.skipped_entries)?;
    }
    if summary.walk_errors > 0 {
        writeln!(out, "Unreadable directories: {}", summary.walk_errors)?;
    }
    for archive in &summary.shard_failures {
        writeln!(out, "Failed to archive: {archive}")?;
    }
    for failure in &summary.upload_failures {
        writeln!(out, "Failed to upload {}: {}", failure.archive, failure.error)?;
    }

    match &summary.retention {
        Some(report) => write_retention(out, report)?,
        None => writeln!(out, "Retention sweep skipped: generations could not be listed")?,
    }

    if !summary.is_complete() {
        log::warn!("Backup {} is incomplete", summary.generation.name());
    }
    Ok(())
}

pub(crate) fn write_retention(out: &mut impl Write, report: &RetentionReport) -> Result<()> {
    writeln!(out, "Kept {} generations", report.kept.len())?;
    for generation in &report.deleted {
        writeln!(out, "Deleted {generation}")?;
    }
    for generation in &report.failed {
        writeln!(out, "Failed to delete {generation}")?;
    }
    Ok(())
}
