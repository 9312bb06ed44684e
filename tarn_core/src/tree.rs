//! Tree entries and the canonical tree encoding.

use crate::error::{Error, Result};
use crate::hash::{HASH_SIZE, Hash};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;

/// Kind of object an entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A blob (file).
    Blob = 1,
    /// A subtree (directory).
    Tree = 2,
}

impl EntryKind {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryKind::Blob),
            2 => Ok(EntryKind::Tree),
            _ => Err(Error::invalid_tree_entry(format!(
                "Invalid entry type: {}",
                value
            ))),
        }
    }

    /// Name used in listings and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Blob => "blob",
            EntryKind::Tree => "tree",
        }
    }
}

/// File mode (POSIX permissions plus file type bits).
pub type FileMode = u32;

/// Common file modes.
pub mod file_modes {
    use super::FileMode;

    /// Regular file (non-executable).
    pub const REGULAR: FileMode = 0o100644;

    /// Executable file.
    pub const EXECUTABLE: FileMode = 0o100755;

    /// Directory.
    pub const DIRECTORY: FileMode = 0o040755;
}

/// What a tree records for one path: object kind, mode and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Entry {
    /// Blob or tree.
    pub kind: EntryKind,
    /// POSIX file mode.
    pub mode: FileMode,
    /// Content hash of the referenced object.
    pub hash: Hash,
}

impl Entry {
    /// A regular file entry.
    pub fn blob(hash: Hash) -> Self {
        Self {
            kind: EntryKind::Blob,
            mode: file_modes::REGULAR,
            hash,
        }
    }

    /// An executable file entry.
    pub fn executable(hash: Hash) -> Self {
        Self {
            kind: EntryKind::Blob,
            mode: file_modes::EXECUTABLE,
            hash,
        }
    }

    /// A directory entry.
    pub fn tree(hash: Hash) -> Self {
        Self {
            kind: EntryKind::Tree,
            mode: file_modes::DIRECTORY,
            hash,
        }
    }

    pub fn is_blob(&self) -> bool {
        self.kind == EntryKind::Blob
    }

    pub fn is_tree(&self) -> bool {
        self.kind == EntryKind::Tree
    }
}

/// Directory contents keyed by single path segment.
///
/// `BTreeMap<String, _>` iterates in bytewise name order, which is the
/// canonical order of the encoding.
pub type Tree = BTreeMap<String, Entry>;

/// Check that a name is usable as a single tree segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_tree_entry("Name cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::invalid_tree_entry(format!(
            "Name too long: {} bytes (max 255)",
            name.len()
        )));
    }

    if name.contains('\0') || name.contains('/') {
        return Err(Error::invalid_tree_entry(format!(
            "Name cannot contain null bytes or slashes: {:?}",
            name
        )));
    }

    if name == "." || name == ".." {
        return Err(Error::invalid_tree_entry(format!("Reserved name: {}", name)));
    }

    Ok(())
}

/// Encode a tree to its canonical byte form.
///
/// Per entry:
/// - 1 byte: kind (1=blob, 2=tree)
/// - 4 bytes: mode (u32 LE)
/// - 32 bytes: hash
/// - 1 byte: name_len
/// - N bytes: name (UTF-8)
pub fn encode_tree(tree: &Tree) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (name, entry) in tree {
        validate_name(name)?;
        buf.push(entry.kind.to_u8());
        buf.extend_from_slice(&entry.mode.to_le_bytes());
        buf.extend_from_slice(entry.hash.as_bytes());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
    }
    Ok(buf)
}

/// Decode a tree from its canonical byte form.
pub fn decode_tree(data: &[u8]) -> Result<Tree> {
    let mut reader = std::io::Cursor::new(data);
    let mut tree = Tree::new();

    while reader.position() < data.len() as u64 {
        let (name, entry) = decode_entry(&mut reader)?;
        if tree.insert(name.clone(), entry).is_some() {
            return Err(Error::invalid_tree_entry(format!("Duplicate name: {}", name)));
        }
    }

    Ok(tree)
}

fn decode_entry<R: Read>(reader: &mut R) -> Result<(String, Entry)> {
    let mut kind_buf = [0u8; 1];
    reader.read_exact(&mut kind_buf)?;
    let kind = EntryKind::from_u8(kind_buf[0])?;

    let mut mode_buf = [0u8; 4];
    reader.read_exact(&mut mode_buf)?;
    let mode = u32::from_le_bytes(mode_buf);

    let mut hash_buf = [0u8; HASH_SIZE];
    reader.read_exact(&mut hash_buf)?;
    let hash = Hash::from_bytes(hash_buf);

    let mut name_len_buf = [0u8; 1];
    reader.read_exact(&mut name_len_buf)?;
    let mut name_buf = vec![0u8; name_len_buf[0] as usize];
    reader.read_exact(&mut name_buf)?;
    let name = String::from_utf8(name_buf)
        .map_err(|e| Error::invalid_tree_entry(format!("Invalid UTF-8 in name: {}", e)))?;
    validate_name(&name)?;

    Ok((name, Entry { kind, mode, hash }))
}
