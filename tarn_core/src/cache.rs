//! The tree cache: import, export and tree algebra over an object store.

use crate::algebra::{self, Change};
use crate::error::Result;
use crate::hash::Hash;
use crate::store::ObjectStore;
use crate::sync::{self, ExportOptions, SyncStats};
use crate::tree::Entry;
use crate::walk::{self, ImportFilter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content-addressed tree cache.
///
/// The methods are async so fetch and sync jobs can be interleaved on one
/// runtime, but the work itself is not cooperative: each call hands its
/// filesystem and store access to tokio's blocking pool
/// (`spawn_blocking`), where it runs on a separate OS thread, possibly in
/// parallel with other calls. The object store is shared across those
/// threads, hence `ObjectStore: Send + Sync`.
///
/// Nothing serializes calls against each other. Callers must not run two
/// exports into the same destination, or with the same index file, at the
/// same time.
#[derive(Debug)]
pub struct TreeStore<S> {
    store: Arc<S>,
}

impl<S> Clone for TreeStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ObjectStore + 'static> TreeStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn object_store(&self) -> &S {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Store the admitted contents of `source` and return the root tree.
    pub async fn import_tree(&self, source: impl AsRef<Path>, filter: &ImportFilter) -> Result<Hash> {
        let source = source.as_ref().to_path_buf();
        let filter = filter.clone();
        self.blocking(move |store| walk::import_dir(store, &source, &filter))
            .await
    }

    /// Make `dest` reflect `tree`, refusing to overwrite local edits unless
    /// forced.
    pub async fn export_tree(
        &self,
        tree: &Hash,
        dest: impl AsRef<Path>,
        options: &ExportOptions,
    ) -> Result<SyncStats> {
        let tree = *tree;
        let dest: PathBuf = dest.as_ref().to_path_buf();
        let options = options.clone();
        self.blocking(move |store| sync::export_tree(store, &tree, &dest, &options))
            .await
    }

    /// `base` (or the empty tree) with `other` grafted at `prefix`.
    pub async fn merge_trees(&self, base: Option<&Hash>, other: &Hash, prefix: &str) -> Result<Hash> {
        let base = base.copied();
        let other = *other;
        let prefix = prefix.to_string();
        self.blocking(move |store| algebra::merge_trees(store, base.as_ref(), &other, &prefix))
            .await
    }

    /// Apply `(path, entry)` edits in order; `None` deletes.
    pub async fn modify_tree<I, P>(&self, base: &Hash, modifications: I) -> Result<Hash>
    where
        I: IntoIterator<Item = (P, Option<Entry>)>,
        P: AsRef<str>,
    {
        let base = *base;
        let modifications: Vec<(String, Option<Entry>)> = modifications
            .into_iter()
            .map(|(path, entry)| (path.as_ref().to_string(), entry))
            .collect();
        self.blocking(move |store| algebra::modify_tree(store, &base, modifications))
            .await
    }

    pub async fn ls_tree(
        &self,
        tree: &Hash,
        path: Option<&str>,
        recursive: bool,
    ) -> Result<BTreeMap<String, Entry>> {
        let tree = *tree;
        let path = path.map(str::to_string);
        self.blocking(move |store| algebra::ls_tree(store, &tree, path.as_deref(), recursive))
            .await
    }

    pub async fn read_file(&self, tree: &Hash, path: &str) -> Result<Vec<u8>> {
        let tree = *tree;
        let path = path.to_string();
        self.blocking(move |store| algebra::read_file(store, &tree, &path))
            .await
    }

    pub async fn diff_trees(&self, old: Option<&Hash>, new: Option<&Hash>) -> Result<Vec<Change>> {
        let old = old.copied();
        let new = new.copied();
        self.blocking(move |store| algebra::diff_trees(store, old.as_ref(), new.as_ref()))
            .await
    }
}
