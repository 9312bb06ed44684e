//! Importing a directory into the store as a tree.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::path;
use crate::store::ObjectStore;
use crate::tree::{Entry, EntryKind, FileMode, Tree, file_modes};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

/// Which paths of a source directory an import includes.
///
/// Both lists hold root-relative paths (files or directories, any depth).
/// With no picks, everything is a candidate; with picks, only paths at or
/// below a pick are. An exclude removes its whole subtree and always wins
/// over a pick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportFilter {
    pub excludes: Vec<String>,
    pub picks: Vec<String>,
}

impl ImportFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.excludes.push(path.into());
        self
    }

    pub fn pick(mut self, path: impl Into<String>) -> Self {
        self.picks.push(path.into());
        self
    }

    fn compile(&self) -> Result<PathRules> {
        let split = |paths: &[String]| -> Result<Vec<Vec<String>>> {
            paths
                .iter()
                .map(|p| Ok(path::segments(p)?.into_iter().map(String::from).collect()))
                .collect()
        };
        Ok(PathRules {
            excludes: split(&self.excludes)?,
            picks: split(&self.picks)?,
        })
    }
}

#[derive(Debug)]
struct PathRules {
    excludes: Vec<Vec<String>>,
    picks: Vec<Vec<String>>,
}

impl PathRules {
    fn excluded(&self, rel: &[String]) -> bool {
        self.excludes.iter().any(|e| rel.starts_with(e))
    }

    /// A directory is walked if it is under a pick or leads to one.
    fn admits_dir(&self, rel: &[String]) -> bool {
        !self.excluded(rel)
            && (self.picks.is_empty()
                || self
                    .picks
                    .iter()
                    .any(|p| rel.starts_with(p) || p.starts_with(rel)))
    }

    fn admits_file(&self, rel: &[String]) -> bool {
        !self.excluded(rel)
            && (self.picks.is_empty() || self.picks.iter().any(|p| rel.starts_with(p)))
    }
}

/// Hash every admitted file under `root` and store the resulting trees.
///
/// Directories that end up with no files are not represented. The source
/// directory is only read, and `.gitignore`-style files are imported like
/// any other file rather than interpreted.
pub(crate) fn import_dir<S: ObjectStore + ?Sized>(
    store: &S,
    root: &Path,
    filter: &ImportFilter,
) -> Result<Hash> {
    let metadata = fs::metadata(root).map_err(|e| Error::Io {
        source: std::io::Error::new(
            e.kind(),
            format!("Cannot import {}: {}", root.display(), e),
        ),
    })?;
    if !metadata.is_dir() {
        return Err(Error::Unsupported {
            path: root.to_path_buf(),
        });
    }

    let rules = filter.compile()?;
    let walk_root = root.to_path_buf();

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Ok(rel) = relative_names(&walk_root, entry.path()) else {
                // Keep it so the loop below reports the bad name.
                return true;
            };
            if entry.file_type().is_some_and(|t| t.is_dir()) {
                rules.admits_dir(&rel)
            } else {
                rules.admits_file(&rel)
            }
        })
        .build();

    let mut builder = DirBuilder::default();
    let mut files = 0usize;

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type().ok_or_else(|| Error::Unsupported {
            path: entry.path().to_path_buf(),
        })?;
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            // Symlinks, sockets, devices
            return Err(Error::Unsupported {
                path: entry.path().to_path_buf(),
            });
        }

        let rel = relative_names(root, entry.path())?;
        let content = fs::read(entry.path())?;
        let hash = store.put_blob(&content)?;
        let mode = file_mode(&entry.metadata()?);
        builder.insert(
            &rel,
            Entry {
                kind: EntryKind::Blob,
                mode,
                hash,
            },
        );
        files += 1;
    }

    let hash = builder.write(store)?;
    tracing::debug!(root = %root.display(), files, tree = %hash, "imported directory");
    Ok(hash)
}

/// Nested directory contents collected before any tree is written.
#[derive(Debug, Default)]
struct DirBuilder {
    files: Tree,
    dirs: BTreeMap<String, DirBuilder>,
}

impl DirBuilder {
    fn insert(&mut self, rel: &[String], entry: Entry) {
        let Some((name, parents)) = rel.split_last() else {
            return;
        };
        let mut node = self;
        for parent in parents {
            node = node.dirs.entry(parent.clone()).or_default();
        }
        node.files.insert(name.clone(), entry);
    }

    /// Store subtrees bottom-up, then this tree.
    fn write<S: ObjectStore + ?Sized>(self, store: &S) -> Result<Hash> {
        let mut tree = self.files;
        for (name, dir) in self.dirs {
            let hash = dir.write(store)?;
            tree.insert(name, Entry::tree(hash));
        }
        store.put_tree(&tree)
    }
}

/// Path of `full` below `root` as UTF-8 segments.
fn relative_names(root: &Path, full: &Path) -> Result<Vec<String>> {
    let rel = full
        .strip_prefix(root)
        .map_err(|_| Error::invalid_path(full.display().to_string(), "outside import root"))?;
    rel.components()
        .map(|component| match component {
            Component::Normal(name) => name.to_str().map(String::from).ok_or_else(|| {
                Error::invalid_tree_entry(format!("Non-UTF-8 name: {}", full.display()))
            }),
            _ => Err(Error::invalid_path(
                full.display().to_string(),
                "unexpected path component",
            )),
        })
        .collect()
}

/// Get the file mode (permissions) from metadata.
#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        file_modes::EXECUTABLE
    } else {
        file_modes::REGULAR
    }
}

/// Get the file mode (permissions) from metadata (Windows fallback).
#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> FileMode {
    file_modes::REGULAR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use tempfile::TempDir;

    fn make_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn blob_paths(store: &MemoryStore, hash: &Hash, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (name, entry) in store.get_tree(hash).unwrap() {
            let full = path::join(prefix, &name);
            if entry.is_tree() {
                out.extend(blob_paths(store, &entry.hash, &full));
            } else {
                out.push(full);
            }
        }
        out
    }

    #[test]
    fn test_import_nested() {
        let dir = make_dir(&[("a", "foo"), ("b/c", "bar"), ("b/d", "baz")]);
        let store = MemoryStore::new();
        let hash = import_dir(&store, dir.path(), &ImportFilter::new()).unwrap();
        assert_eq!(blob_paths(&store, &hash, ""), vec!["a", "b/c", "b/d"]);
    }

    #[test]
    fn test_identical_content_identical_tree() {
        let one = make_dir(&[("x/y", "same"), ("z", "")]);
        let two = make_dir(&[("z", ""), ("x/y", "same")]);
        let store = MemoryStore::new();
        assert_eq!(
            import_dir(&store, one.path(), &ImportFilter::new()).unwrap(),
            import_dir(&store, two.path(), &ImportFilter::new()).unwrap()
        );
    }

    #[test]
    fn test_empty_directories_skipped() {
        let dir = make_dir(&[("a", "foo")]);
        fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
        let store = MemoryStore::new();
        let hash = import_dir(&store, dir.path(), &ImportFilter::new()).unwrap();
        let tree = store.get_tree(&hash).unwrap();
        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_gitignore_is_plain_content() {
        let dir = make_dir(&[("fee/fi", "fo fum"), (".gitignore", "fee/")]);
        let store = MemoryStore::new();
        let hash = import_dir(&store, dir.path(), &ImportFilter::new()).unwrap();
        assert_eq!(blob_paths(&store, &hash, ""), vec![".gitignore", "fee/fi"]);
    }

    #[test]
    fn test_filter_precedence() {
        let dir = make_dir(&[("a", "foo"), ("b/c", "bar"), ("b/d", "baz")]);
        let store = MemoryStore::new();

        let picked_and_excluded = ImportFilter::new().pick("b").exclude("b/c");
        let hash = import_dir(&store, dir.path(), &picked_and_excluded).unwrap();
        assert_eq!(blob_paths(&store, &hash, ""), vec!["b/d"]);

        let nested_pick = ImportFilter::new().pick("b/c/");
        let hash = import_dir(&store, dir.path(), &nested_pick).unwrap();
        assert_eq!(blob_paths(&store, &hash, ""), vec!["b/c"]);

        let excluded_dir = ImportFilter::new().exclude("./b");
        let hash = import_dir(&store, dir.path(), &excluded_dir).unwrap();
        assert_eq!(blob_paths(&store, &hash, ""), vec!["a"]);
    }

    #[test]
    fn test_source_not_modified() {
        let dir = make_dir(&[("a", "foo"), ("b/c", "bar")]);
        let before = fs::read_to_string(dir.path().join("b/c")).unwrap();
        let store = MemoryStore::new();
        import_dir(&store, dir.path(), &ImportFilter::new().exclude("b")).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("b/c")).unwrap(), before);
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        assert!(import_dir(&store, &dir.path().join("nope"), &ImportFilter::new()).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_executable_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = make_dir(&[("run.sh", "#!/bin/sh\n")]);
        let script = dir.path().join("run.sh");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let store = MemoryStore::new();
        let hash = import_dir(&store, dir.path(), &ImportFilter::new()).unwrap();
        let tree = store.get_tree(&hash).unwrap();
        assert_eq!(tree["run.sh"].mode, file_modes::EXECUTABLE);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_unsupported() {
        let dir = make_dir(&[("target", "x")]);
        std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();
        let store = MemoryStore::new();
        assert!(matches!(
            import_dir(&store, dir.path(), &ImportFilter::new()),
            Err(Error::Unsupported { .. })
        ));
    }
}
