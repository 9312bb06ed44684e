//! Materializing trees into working copies without clobbering local edits.
//!
//! An export runs in two phases. First every path the previous and target
//! trees know about is checked against the disk and the dirty set is
//! collected; if it is non-empty and the export is not forced, nothing is
//! written. Then the difference between the two trees is applied: removed
//! files are deleted, new and changed files are written atomically, and
//! everything else under the destination is left alone.

use crate::algebra::flatten;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::index::IndexCache;
use crate::store::ObjectStore;
use crate::tree::Entry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How an export reconciles with what is already on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// The tree this destination was last synced to. Local edits to its
    /// files block the export.
    pub previous_tree: Option<Hash>,
    /// Where to keep file metadata between exports of this destination.
    pub previous_index_file: Option<PathBuf>,
    /// Overwrite local modifications instead of failing.
    pub force: bool,
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_tree(mut self, tree: Hash) -> Self {
        self.previous_tree = Some(tree);
        self
    }

    pub fn previous_index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.previous_index_file = Some(path.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What an export changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub files_written: usize,
    pub files_removed: usize,
}

/// State of a tracked path in the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Missing,
    Clean,
    Dirty,
}

pub(crate) fn export_tree<S: ObjectStore + ?Sized>(
    store: &S,
    tree: &Hash,
    dest: &Path,
    options: &ExportOptions,
) -> Result<SyncStats> {
    fs::create_dir_all(dest)?;
    let work_dir = dest.canonicalize()?;

    let target = flatten(store, tree)?;
    let previous = match &options.previous_tree {
        Some(hash) => flatten(store, hash)?,
        None => BTreeMap::new(),
    };

    let mut index = match &options.previous_index_file {
        Some(path) => IndexCache::load(path, &work_dir)?,
        None => IndexCache::new(&work_dir),
    };

    let mut checker = DirtyCheck {
        root: &work_dir,
        previous: &previous,
        index: &mut index,
        dirty: BTreeSet::new(),
    };
    let mut probes = BTreeMap::new();
    for (rel, entry) in &previous {
        probes.insert(rel.as_str(), checker.probe_tracked(rel, entry)?);
    }
    for rel in target.keys() {
        if !previous.contains_key(rel) {
            checker.probe_untracked(rel)?;
        }
    }
    let dirty = checker.dirty;

    if !dirty.is_empty() {
        if !options.force {
            debug!(dest = %dest.display(), dirty = dirty.len(), "refusing to export over local changes");
            return Err(Error::DirtyWorkingCopy {
                dest: dest.to_path_buf(),
                paths: dirty.into_iter().collect(),
            });
        }
        debug!(dest = %dest.display(), dirty = dirty.len(), "forcing export over local changes");
    }

    let removals: Vec<&String> = previous
        .keys()
        .filter(|rel| !target.contains_key(*rel))
        .collect();
    let writes: Vec<(&String, &Entry)> = target
        .iter()
        .filter(|(rel, entry)| {
            previous.get(*rel) != Some(*entry)
                || probes.get(rel.as_str()) != Some(&Probe::Clean)
                || dirty.contains(*rel)
        })
        .collect();
    debug!(
        dest = %dest.display(),
        writes = writes.len(),
        removals = removals.len(),
        "export plan"
    );

    let mut stats = SyncStats::default();
    for rel in removals {
        if remove_path(&work_dir, rel)? {
            stats.files_removed += 1;
        }
        index.forget(rel);
    }
    for (rel, entry) in writes {
        let content = store.get_blob(&entry.hash)?;
        let full = write_file(&work_dir, rel, &content, entry)?;
        if options.previous_index_file.is_some() {
            index.record(rel, &fs::symlink_metadata(&full)?, entry.hash);
        }
        stats.files_written += 1;
    }

    if let Some(path) = &options.previous_index_file {
        index.retain(|rel| target.contains_key(rel));
        index.save(path)?;
    }

    info!(
        dest = %dest.display(),
        tree = %tree,
        written = stats.files_written,
        removed = stats.files_removed,
        "exported tree"
    );
    Ok(stats)
}

struct DirtyCheck<'a> {
    root: &'a Path,
    previous: &'a BTreeMap<String, Entry>,
    index: &'a mut IndexCache,
    dirty: BTreeSet<String>,
}

impl DirtyCheck<'_> {
    /// Compare a file of the previous tree with the disk.
    ///
    /// A missing file is not a modification; different content, or
    /// anything other than a file in its place, is.
    fn probe_tracked(&mut self, rel: &str, entry: &Entry) -> Result<Probe> {
        if !self.ancestors_clear(rel)? {
            return Ok(Probe::Missing);
        }
        let full = local_path(self.root, rel);
        let metadata = match fs::symlink_metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Probe::Missing),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            self.dirty.insert(rel.to_string());
            return Ok(Probe::Dirty);
        }

        let hash = match self.index.lookup(rel, &metadata) {
            Some(hash) => hash,
            None => {
                let hash = Hash::of_blob_file(&full)?;
                self.index.record(rel, &metadata, hash);
                hash
            }
        };
        if hash == entry.hash {
            Ok(Probe::Clean)
        } else {
            self.dirty.insert(rel.to_string());
            Ok(Probe::Dirty)
        }
    }

    /// Check that writing a new file at `rel` would not clobber anything
    /// the cache did not put there.
    fn probe_untracked(&mut self, rel: &str) -> Result<()> {
        if !self.ancestors_clear(rel)? {
            return Ok(());
        }
        let full = local_path(self.root, rel);
        let metadata = match fs::symlink_metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() {
            self.dirty.insert(rel.to_string());
            return Ok(());
        }

        // A directory is in the way. Tracked files under it get removed; any
        // other file would be lost.
        for entry in ignore::WalkBuilder::new(&full)
            .standard_filters(false)
            .follow_links(false)
            .build()
        {
            let entry = entry?;
            if entry.file_type().is_some_and(|t| t.is_dir()) {
                continue;
            }
            let tracked = entry
                .path()
                .strip_prefix(self.root)
                .ok()
                .and_then(tree_path)
                .is_some_and(|p| self.previous.contains_key(&p));
            if !tracked {
                self.dirty.insert(rel.to_string());
                break;
            }
        }
        Ok(())
    }

    /// Walk the parent directories of `rel` from the top. Returns false if
    /// one of them is not a directory, recording it as dirty unless the
    /// previous tree put a file there.
    fn ancestors_clear(&mut self, rel: &str) -> Result<bool> {
        let segments: Vec<&str> = rel.split('/').collect();
        for depth in 1..segments.len() {
            let ancestor = segments[..depth].join("/");
            match fs::symlink_metadata(local_path(self.root, &ancestor)) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    if !self.previous.contains_key(&ancestor) {
                        self.dirty.insert(ancestor);
                    }
                    return Ok(false);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}

/// Delete the file or symlink at `rel`, then any parent directories left
/// empty. A directory at `rel` holds files the cache never wrote and is
/// left in place.
fn remove_path(root: &Path, rel: &str) -> Result<bool> {
    let full = local_path(root, rel);
    let removed = match fs::symlink_metadata(&full) {
        Ok(metadata) if metadata.is_dir() => {
            debug!(path = rel, "keeping local directory at a removed path");
            false
        }
        Ok(_) => {
            fs::remove_file(&full)?;
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => false,
        Err(e) => return Err(e.into()),
    };
    if removed {
        prune_empty_parents(root, &full)?;
    }
    Ok(removed)
}

fn prune_empty_parents(root: &Path, full: &Path) -> Result<()> {
    let mut dir = full.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if fs::read_dir(current)?.next().is_some() {
            break;
        }
        fs::remove_dir(current)?;
        dir = current.parent();
    }
    Ok(())
}

/// Atomically place `content` at `rel`, clearing anything in the way.
fn write_file(root: &Path, rel: &str, content: &[u8], entry: &Entry) -> Result<PathBuf> {
    let segments: Vec<&str> = rel.split('/').collect();
    let mut parent = root.to_path_buf();
    for segment in &segments[..segments.len() - 1] {
        parent.push(segment);
        match fs::symlink_metadata(&parent) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                fs::remove_file(&parent)?;
                fs::create_dir(&parent)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir(&parent)?,
            Err(e) => return Err(e.into()),
        }
    }

    let full = local_path(root, rel);
    if fs::symlink_metadata(&full).is_ok_and(|m| m.is_dir()) {
        fs::remove_dir_all(&full)?;
    }

    let mut temp_file = tempfile::NamedTempFile::new_in(&parent)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    set_mode(temp_file.as_file(), entry)?;
    temp_file.persist(&full)?;
    Ok(full)
}

#[cfg(unix)]
fn set_mode(file: &fs::File, entry: &Entry) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(entry.mode & 0o777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _entry: &Entry) -> Result<()> {
    Ok(())
}

fn local_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
}

fn tree_path(rel: &Path) -> Option<String> {
    let names: Option<Vec<&str>> = rel.iter().map(|name| name.to_str()).collect();
    names.map(|names| names.join("/"))
}
