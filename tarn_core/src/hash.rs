//! Object identities: domain-separated BLAKE3 digests.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Length of an object identity in bytes.
pub const HASH_SIZE: usize = 32;

/// Domain tag prepended to blob content before hashing.
const BLOB_DOMAIN: u8 = 1;

/// Domain tag prepended to an encoded tree before hashing.
const TREE_DOMAIN: u8 = 2;

/// A 32-byte BLAKE3 digest identifying a blob or a tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Wrap a raw digest.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Parse the 64-character hex form printed by `Display`.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            let reason = format!("{} hex characters, want {}", hex_str.len(), HASH_SIZE * 2);
            return Err(Error::invalid_hash(reason));
        }

        let mut digest = [0u8; HASH_SIZE];
        hex::decode_to_slice(hex_str, &mut digest)
            .map_err(|e| Error::invalid_hash(format!("not hex: {}", e)))?;
        Ok(Hash(digest))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First byte as hex, used as the shard directory.
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remaining 31 bytes as hex, used as the object file name.
    pub fn suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Identity of a blob with the given content.
    pub fn of_blob(content: &[u8]) -> Self {
        Self::digest(BLOB_DOMAIN, content)
    }

    /// Identity of a tree with the given canonical encoding.
    pub fn of_tree(encoded: &[u8]) -> Self {
        Self::digest(TREE_DOMAIN, encoded)
    }

    /// Blob identity of everything a reader yields.
    pub fn of_blob_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[BLOB_DOMAIN]);
        std::io::copy(&mut reader, &mut hasher)?;
        Ok(Hash(*hasher.finalize().as_bytes()))
    }

    /// Blob identity of a file's current content.
    pub fn of_blob_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::of_blob_reader(std::io::BufReader::new(file))
    }

    fn digest(domain: u8, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[domain]);
        hasher.update(data);
        Hash(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl std::str::FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
