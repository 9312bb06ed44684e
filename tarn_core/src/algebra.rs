//! Operations that read or derive trees without touching a working copy.
//!
//! Every derived tree is written back to the store; inputs are never
//! modified and unchanged subtrees keep their identities.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::path;
use crate::store::ObjectStore;
use crate::tree::{Entry, Tree};
use std::collections::BTreeMap;

/// One blob-level difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Normalized path of the file.
    pub path: String,
    /// Entry before, `None` if the file was added.
    pub old: Option<Entry>,
    /// Entry after, `None` if the file was removed.
    pub new: Option<Entry>,
}

impl Change {
    pub fn is_added(&self) -> bool {
        self.old.is_none()
    }

    pub fn is_removed(&self) -> bool {
        self.new.is_none()
    }
}

/// Resolve a path to its entry. The root resolves to a tree entry for `root`.
pub fn lookup<S: ObjectStore + ?Sized>(
    store: &S,
    root: &Hash,
    segments: &[&str],
) -> Result<Option<Entry>> {
    let mut current = Entry::tree(*root);
    for segment in segments {
        if !current.is_tree() {
            return Ok(None);
        }
        match store.get_tree(&current.hash)?.get(*segment) {
            Some(entry) => current = *entry,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// List entries of `root`, keyed by full normalized path.
///
/// - `path = None`: top-level entries (every entry if `recursive`).
/// - `path` names a file: just that file, recursive or not.
/// - `path` names a directory: its children, or with `recursive` the
///   directory itself plus everything below it.
/// - `path` missing: nothing.
pub fn ls_tree<S: ObjectStore + ?Sized>(
    store: &S,
    root: &Hash,
    path: Option<&str>,
    recursive: bool,
) -> Result<BTreeMap<String, Entry>> {
    let segments = path::segments(path.unwrap_or(""))?;
    let mut out = BTreeMap::new();

    if segments.is_empty() {
        list_children(store, root, "", recursive, &mut out)?;
        return Ok(out);
    }

    let full = segments.join("/");
    match lookup(store, root, &segments)? {
        None => {}
        Some(entry) if entry.is_blob() => {
            out.insert(full, entry);
        }
        Some(entry) => {
            if recursive {
                out.insert(full.clone(), entry);
            }
            list_children(store, &entry.hash, &full, recursive, &mut out)?;
        }
    }
    Ok(out)
}

fn list_children<S: ObjectStore + ?Sized>(
    store: &S,
    tree: &Hash,
    prefix: &str,
    recursive: bool,
    out: &mut BTreeMap<String, Entry>,
) -> Result<()> {
    for (name, entry) in store.get_tree(tree)? {
        let full = path::join(prefix, &name);
        if recursive && entry.is_tree() {
            list_children(store, &entry.hash, &full, true, out)?;
        }
        out.insert(full, entry);
    }
    Ok(())
}

/// Every file below `root`, keyed by full normalized path.
pub fn flatten<S: ObjectStore + ?Sized>(store: &S, root: &Hash) -> Result<BTreeMap<String, Entry>> {
    let mut all = BTreeMap::new();
    list_children(store, root, "", true, &mut all)?;
    all.retain(|_, entry| entry.is_blob());
    Ok(all)
}

/// Raw content of the file at `path`.
pub fn read_file<S: ObjectStore + ?Sized>(store: &S, root: &Hash, path: &str) -> Result<Vec<u8>> {
    let segments = path::segments(path)?;
    match lookup(store, root, &segments)? {
        None => Err(Error::not_found(path)),
        Some(entry) if entry.is_tree() => Err(Error::is_a_directory(path)),
        Some(entry) => store.get_blob(&entry.hash),
    }
}

/// Graft `other` into `base` at `prefix`.
///
/// A non-root prefix must be free in `base`: no file at or above it and no
/// non-empty directory at it. With a root prefix the two trees are overlaid;
/// shared directories merge and any overlapping file is a conflict.
pub fn merge_trees<S: ObjectStore + ?Sized>(
    store: &S,
    base: Option<&Hash>,
    other: &Hash,
    prefix: &str,
) -> Result<Hash> {
    let segments = path::segments(prefix)?;
    let empty = store.empty_tree()?;
    let base = base.copied().unwrap_or(empty);

    if *other == empty {
        return Ok(base);
    }

    if segments.is_empty() {
        return overlay(store, &base, other, "");
    }

    let display = segments.join("/");
    for depth in 1..=segments.len() {
        match lookup(store, &base, &segments[..depth])? {
            None => break,
            Some(entry) if entry.is_blob() => {
                return Err(Error::merge_conflict(
                    &display,
                    format!("{} is an existing file", segments[..depth].join("/")),
                ));
            }
            Some(entry) if depth == segments.len() && entry.hash != empty => {
                return Err(Error::merge_conflict(&display, "directory already populated"));
            }
            Some(_) => {}
        }
    }

    let base_tree = store.get_tree(&base)?;
    let merged = edit(store, base_tree, &segments, Some(Entry::tree(*other)))?;
    store.put_tree(&merged)
}

fn overlay<S: ObjectStore + ?Sized>(
    store: &S,
    base: &Hash,
    other: &Hash,
    prefix: &str,
) -> Result<Hash> {
    let mut merged = store.get_tree(base)?;
    for (name, incoming) in store.get_tree(other)? {
        let full = path::join(prefix, &name);
        let combined = match merged.get(&name) {
            None => incoming,
            Some(existing) if existing.is_tree() && incoming.is_tree() => {
                Entry::tree(overlay(store, &existing.hash, &incoming.hash, &full)?)
            }
            Some(_) => {
                return Err(Error::merge_conflict(
                    "",
                    format!("{} exists in both trees", full),
                ));
            }
        };
        merged.insert(name, combined);
    }
    store.put_tree(&merged)
}

/// Apply point edits to `base` in sequence order.
///
/// `None` deletes the path (a no-op if it is absent or lies below a file);
/// `Some(entry)` places the entry there, replacing whatever was at that
/// path and creating directories above it. Each edit sees the result of the
/// ones before it, so for overlapping paths the last edit wins.
pub fn modify_tree<S, I, P>(store: &S, base: &Hash, modifications: I) -> Result<Hash>
where
    S: ObjectStore + ?Sized,
    I: IntoIterator<Item = (P, Option<Entry>)>,
    P: AsRef<str>,
{
    let mut tree = store.get_tree(base)?;
    for (raw_path, value) in modifications {
        let raw_path = raw_path.as_ref();
        let segments = path::segments(raw_path)?;
        if segments.is_empty() {
            tree = match value {
                None => Tree::new(),
                Some(entry) if entry.is_tree() => store.get_tree(&entry.hash)?,
                Some(_) => {
                    return Err(Error::invalid_path(raw_path, "cannot place a file at the root"));
                }
            };
            continue;
        }
        tree = edit(store, tree, &segments, value)?;
    }
    store.put_tree(&tree)
}

/// Set or delete one path inside an in-memory tree, storing changed subtrees.
fn edit<S: ObjectStore + ?Sized>(
    store: &S,
    mut tree: Tree,
    segments: &[&str],
    value: Option<Entry>,
) -> Result<Tree> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(tree);
    };

    if rest.is_empty() {
        match value {
            Some(entry) => {
                tree.insert((*first).to_string(), entry);
            }
            None => {
                tree.remove(*first);
            }
        }
        return Ok(tree);
    }

    let child = match tree.get(*first) {
        Some(entry) if entry.is_tree() => store.get_tree(&entry.hash)?,
        // Nothing to delete below a file or a missing path.
        _ if value.is_none() => return Ok(tree),
        // A file in the way is replaced by a directory.
        _ => Tree::new(),
    };

    let child = edit(store, child, rest, value)?;
    if child.is_empty() {
        tree.remove(*first);
    } else {
        let hash = store.put_tree(&child)?;
        tree.insert((*first).to_string(), Entry::tree(hash));
    }
    Ok(tree)
}

/// Blob-level differences from `old` to `new`, ordered by path.
///
/// Subtrees with equal identities are skipped without being read. A mode
/// change on identical content counts as a modification.
pub fn diff_trees<S: ObjectStore + ?Sized>(
    store: &S,
    old: Option<&Hash>,
    new: Option<&Hash>,
) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    diff_into(store, old, new, "", &mut changes)?;
    Ok(changes)
}

fn diff_into<S: ObjectStore + ?Sized>(
    store: &S,
    old: Option<&Hash>,
    new: Option<&Hash>,
    prefix: &str,
    changes: &mut Vec<Change>,
) -> Result<()> {
    if old == new {
        return Ok(());
    }
    let old_tree = match old {
        Some(hash) => store.get_tree(hash)?,
        None => Tree::new(),
    };
    let new_tree = match new {
        Some(hash) => store.get_tree(hash)?,
        None => Tree::new(),
    };

    let mut names: Vec<&String> = old_tree.keys().chain(new_tree.keys()).collect();
    names.sort();
    names.dedup();

    for name in names {
        let full = path::join(prefix, name);
        let before = old_tree.get(name);
        let after = new_tree.get(name);
        if before == after {
            continue;
        }

        let old_blob = before.filter(|e| e.is_blob()).copied();
        let new_blob = after.filter(|e| e.is_blob()).copied();
        let old_sub = before.filter(|e| e.is_tree()).map(|e| e.hash);
        let new_sub = after.filter(|e| e.is_tree()).map(|e| e.hash);

        // Files sort before the contents of a same-named directory.
        if old_blob.is_some() || new_blob.is_some() {
            changes.push(Change {
                path: full.clone(),
                old: old_blob,
                new: new_blob,
            });
        }
        if old_sub.is_some() || new_sub.is_some() {
            diff_into(store, old_sub.as_ref(), new_sub.as_ref(), &full, changes)?;
        }
    }
    Ok(())
}
