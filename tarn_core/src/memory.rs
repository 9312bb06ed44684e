//! In-memory object store, used in tests and for throwaway tree algebra.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::ObjectStore;
use crate::tree::{self, Tree};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
}

/// An [`ObjectStore`] that keeps every object in a hash map.
///
/// Identities are computed exactly as [`DiskStore`](crate::DiskStore)
/// computes them, so hashes are interchangeable between the two.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Hash, Object>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct objects stored.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn put_blob(&self, content: &[u8]) -> Result<Hash> {
        let hash = Hash::of_blob(content);
        self.objects
            .write()
            .entry(hash)
            .or_insert_with(|| Object::Blob(content.to_vec()));
        Ok(hash)
    }

    fn get_blob(&self, hash: &Hash) -> Result<Vec<u8>> {
        match self.objects.read().get(hash) {
            Some(Object::Blob(content)) => Ok(content.clone()),
            Some(Object::Tree(_)) => Err(Error::invalid_object_type("blob", "tree")),
            None => Err(Error::object_not_found(hash.to_hex())),
        }
    }

    fn put_tree(&self, tree: &Tree) -> Result<Hash> {
        let hash = Hash::of_tree(&tree::encode_tree(tree)?);
        self.objects
            .write()
            .entry(hash)
            .or_insert_with(|| Object::Tree(tree.clone()));
        Ok(hash)
    }

    fn get_tree(&self, hash: &Hash) -> Result<Tree> {
        match self.objects.read().get(hash) {
            Some(Object::Tree(tree)) => Ok(tree.clone()),
            Some(Object::Blob(_)) => Err(Error::invalid_object_type("tree", "blob")),
            None => Err(Error::object_not_found(hash.to_hex())),
        }
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.objects.read().contains_key(hash)
    }
}
