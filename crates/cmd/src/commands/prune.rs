// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use archiver::Archiver;

use super::run::write_retention;

/// Delete generations beyond the retention count without backing up
pub async fn prune_command(archiver: &Archiver, out: &mut impl Write) -> Result<()> {
    let report = archiver.prune().await.context("Retention sweep failed")?;
    write_retention(out, &report)?;
    if !report.failed.is_empty() {
        log::warn!("{} generations could not be deleted", report.failed.len());
    }
    Ok(())
}
