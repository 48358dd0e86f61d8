// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Repository traversal
//!
//! The repository layout is fixed:
//!
//! ```text
//! {root}/{full_match|partial_match}/{chain_id}/{0xADDRESS}/**
//! ```
//!
//! A chain directory is listed once into a [`ChainIndex`], which groups the
//! address directories by shard key. Walking a shard then descends only into
//! that shard's address directories, at most `concurrency` of them at a time.
//! Read failures inside one subtree are yielded as errors and the walk moves
//! on to the next subtree.

use crate::error::BackupError;
use crate::shard::{AddressPrefix, MatchType, Resolution, ShardKey, resolve};
use crate::Result;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of address directories traversed concurrently
pub const DEFAULT_WALK_CONCURRENCY: usize = 50;

/// One regular file found in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    path: PathBuf,
    relative: PathBuf,
    root_name: Arc<str>,
}

impl RepositoryEntry {
    /// Absolute path on the host filesystem
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the repository root, e.g. `full_match/1/0xab.../metadata.json`
    #[must_use]
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Name of the entry inside a shard archive.
    ///
    /// The repository directory name is kept as the single leading component,
    /// so extracting with one component stripped restores the relative layout.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        Path::new(self.root_name.as_ref()).join(&self.relative)
    }
}

/// Address directories of one chain, grouped by shard
#[derive(Debug, Clone)]
pub struct ChainIndex {
    match_type: MatchType,
    chain_id: String,
    shards: BTreeMap<AddressPrefix, Vec<PathBuf>>,
    skipped: usize,
}

impl ChainIndex {
    fn empty(match_type: MatchType, chain_id: &str) -> Self {
        Self {
            match_type,
            chain_id: chain_id.to_string(),
            shards: BTreeMap::new(),
            skipped: 0,
        }
    }

    #[must_use]
    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    #[must_use]
    pub fn key(&self, prefix: AddressPrefix) -> ShardKey {
        ShardKey::new(self.match_type, self.chain_id.clone(), prefix)
    }

    /// Repository-relative address paths for one prefix, sorted by name
    #[must_use]
    pub fn address_paths(&self, prefix: AddressPrefix) -> &[PathBuf] {
        self.shards.get(&prefix).map(Vec::as_slice).unwrap_or_default()
    }

    /// Prefixes that have at least one address directory
    pub fn prefixes(&self) -> impl Iterator<Item = AddressPrefix> + '_ {
        self.shards.keys().copied()
    }

    /// Number of non-empty shards
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Entries in the chain directory that do not belong to any shard
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Walks a repository root
#[derive(Debug, Clone)]
pub struct RepositoryWalker {
    root: PathBuf,
    root_name: Arc<str>,
    concurrency: usize,
}

impl RepositoryWalker {
    /// Create a walker for the repository at `root`.
    ///
    /// The root must end in a named directory; that name becomes the leading
    /// component of every archive entry.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        let root_name = root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                BackupError::Configuration(format!(
                    "repository path {} must end in a directory name",
                    root.display()
                ))
            })?
            .into();

        Ok(Self {
            root,
            root_name,
            concurrency: DEFAULT_WALK_CONCURRENCY,
        })
    }

    /// Set the number of subtrees traversed concurrently (at least one)
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chain directories present under either match type, sorted
    pub async fn discover_chains(&self) -> Result<Vec<String>> {
        let mut chains = BTreeSet::new();

        for match_type in MatchType::ALL {
            let dir = self.root.join(match_type.dir_name());
            let Some(children) = read_children(&dir).await? else {
                debug!("No {} directory under {}", match_type, self.root.display());
                continue;
            };
            for (name, file_type) in children {
                if !file_type.is_dir() {
                    continue;
                }
                match name.into_string() {
                    Ok(name) => {
                        _ = chains.insert(name);
                    }
                    Err(name) => {
                        warn!("Skipping non UTF-8 chain {:?} in {}", name, dir.display());
                    }
                }
            }
        }

        Ok(chains.into_iter().collect())
    }

    /// List a chain directory once and group its address directories by shard.
    ///
    /// A chain that does not exist for this match type yields an empty index.
    pub async fn index_chain(&self, match_type: MatchType, chain_id: &str) -> Result<ChainIndex> {
        let chain_relative = Path::new(match_type.dir_name()).join(chain_id);
        let mut index = ChainIndex::empty(match_type, chain_id);

        let Some(children) = read_children(&self.root.join(&chain_relative)).await? else {
            return Ok(index);
        };

        for (name, file_type) in children {
            let relative = chain_relative.join(&name);
            if file_type.is_symlink() {
                debug!("Skipping symlink: {}", relative.display());
                index.skipped += 1;
                continue;
            }
            match resolve(&relative) {
                Resolution::Shard(key) => index
                    .shards
                    .entry(key.address_prefix)
                    .or_default()
                    .push(relative),
                Resolution::Skip(reason) => {
                    debug!("Skipping {}: {}", relative.display(), reason);
                    index.skipped += 1;
                }
            }
        }

        debug!(
            "Indexed {}/{}: {} shards, {} skipped",
            match_type,
            chain_id,
            index.len(),
            index.skipped
        );
        Ok(index)
    }

    /// Stream every regular file of one shard from a chain index
    #[must_use]
    pub fn walk_index(
        &self,
        index: &ChainIndex,
        prefix: AddressPrefix,
    ) -> BoxStream<'static, Result<RepositoryEntry>> {
        let addresses = index.address_paths(prefix).to_vec();
        let walker = self.clone();

        async_stream::stream! {
            let mut trees = stream::iter(addresses)
                .map(|relative| walker.collect_tree(relative))
                .buffered(walker.concurrency);

            while let Some(items) = trees.next().await {
                for item in items {
                    yield item;
                }
            }
        }
        .boxed()
    }

    /// Stream every regular file that belongs to `key`
    pub async fn walk(&self, key: &ShardKey) -> Result<BoxStream<'static, Result<RepositoryEntry>>> {
        let index = self.index_chain(key.match_type, &key.chain_id).await?;
        Ok(self.walk_index(&index, key.address_prefix))
    }

    fn entry(&self, relative: PathBuf) -> RepositoryEntry {
        RepositoryEntry {
            path: self.root.join(&relative),
            relative,
            root_name: self.root_name.clone(),
        }
    }

    /// Collect the regular files below one address path.
    ///
    /// Symlinks and special files are left out. A directory that cannot be read
    /// contributes one error item; its siblings are still visited.
    async fn collect_tree(&self, relative: PathBuf) -> Vec<Result<RepositoryEntry>> {
        let mut found = Vec::new();

        let start = self.root.join(&relative);
        let file_type = match tokio::fs::symlink_metadata(&start).await {
            Ok(metadata) => metadata.file_type(),
            Err(source) => {
                warn!("Cannot stat {}: {}", start.display(), source);
                found.push(Err(BackupError::ReadEntry { path: start, source }));
                return found;
            }
        };
        if file_type.is_file() {
            found.push(Ok(self.entry(relative)));
            return found;
        }
        if !file_type.is_dir() {
            return found;
        }

        let mut pending = vec![relative];
        while let Some(dir) = pending.pop() {
            let children = match read_children(&self.root.join(&dir)).await {
                Ok(Some(children)) => children,
                Ok(None) => continue,
                Err(err) => {
                    warn!("{}", err);
                    found.push(Err(err));
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for (name, file_type) in children {
                let child = dir.join(name);
                if file_type.is_file() {
                    found.push(Ok(self.entry(child)));
                } else if file_type.is_dir() {
                    subdirs.push(child);
                }
            }
            // Reversed so the stack pops them in name order.
            pending.extend(subdirs.into_iter().rev());
        }

        found
    }
}

/// Read a directory's children as (name, type) pairs sorted by name.
///
/// Returns `None` when the directory does not exist. Types come from the
/// directory entry itself, so symlinks are reported as symlinks. Names are
/// kept as the OS gives them, UTF-8 or not.
async fn read_children(dir: &Path) -> Result<Option<Vec<(OsString, std::fs::FileType)>>> {
    let read_error = |source| BackupError::ReadDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(read_error(err)),
    };

    let mut children = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(read_error)? {
        let file_type = entry.file_type().await.map_err(read_error)?;
        children.push((entry.file_name(), file_type));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(Some(children))
}
