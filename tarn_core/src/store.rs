//! The object store capability and its on-disk implementation.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::{CompressionType, HEADER_SIZE, ObjectHeader, ObjectType};
use crate::tree::{self, Tree};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Compression threshold: blobs >= 4KB are compressed.
const COMPRESSION_THRESHOLD: usize = 4096;

/// Immutable, content-addressed storage for blobs and trees.
///
/// Writing the same content twice returns the same hash and stores it once.
pub trait ObjectStore: Send + Sync {
    /// Store file content, returning its blob identity.
    fn put_blob(&self, content: &[u8]) -> Result<Hash>;

    /// Read back a blob's content.
    fn get_blob(&self, hash: &Hash) -> Result<Vec<u8>>;

    /// Store a tree, returning its identity.
    fn put_tree(&self, tree: &Tree) -> Result<Hash>;

    /// Read back a tree's entries.
    fn get_tree(&self, hash: &Hash) -> Result<Tree>;

    /// Whether an object with this identity exists.
    fn contains(&self, hash: &Hash) -> bool;

    /// Identity of the tree with no entries, storing it if needed.
    fn empty_tree(&self) -> Result<Hash> {
        self.put_tree(&Tree::new())
    }
}

/// A content-addressed store rooted at a directory.
///
/// Layout:
/// - `objects/{prefix}/{suffix}` object files
/// - `config` with the format version and compression setting
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    compression: CompressionType,
}

impl DiskStore {
    /// Initialize a new store at the given path.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::init_with(root, CompressionType::Zstd)
    }

    /// Initialize a new store with an explicit compression setting.
    pub fn init_with<P: AsRef<Path>>(root: P, compression: CompressionType) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("objects"))?;

        let config_content = format!("version=1\ncompression={}\n", compression.as_str());
        fs::write(root.join("config"), config_content)?;

        debug!(root = %root.display(), "initialized object store");
        Ok(Self { root, compression })
    }

    /// Open an existing store at the given path.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config_content = fs::read_to_string(&config_path)?;
        let compression = Self::parse_config(&config_content)
            .map_err(|reason| Error::invalid_store(&root, reason))?;

        if !root.join("objects").is_dir() {
            return Err(Error::invalid_store(&root, "objects directory missing"));
        }

        Ok(Self { root, compression })
    }

    /// Open the store at `root`, initializing it if it does not exist yet.
    pub fn open_or_init<P: AsRef<Path>>(root: P) -> Result<Self> {
        if root.as_ref().join("config").exists() {
            Self::open(root)
        } else {
            Self::init(root)
        }
    }

    /// Parse the config file, returning the compression setting.
    fn parse_config(content: &str) -> std::result::Result<CompressionType, String> {
        let mut version = None;
        let mut compression = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "compression" => compression = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(format!("unsupported config version: {:?}", version));
        }

        match compression {
            None => Ok(CompressionType::Zstd),
            Some(name) => CompressionType::parse(name)
                .ok_or_else(|| format!("unsupported compression: {}", name)),
        }
    }

    /// Returns: `objects/{prefix}/{suffix}`
    pub fn object_path(&self, hash: &Hash) -> PathBuf {
        self.root
            .join("objects")
            .join(hash.prefix())
            .join(hash.suffix())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Write an object atomically unless it already exists.
    fn write_object(&self, hash: &Hash, object_type: ObjectType, payload: &[u8]) -> Result<()> {
        let obj_path = self.object_path(hash);
        if obj_path.exists() {
            return Ok(());
        }

        let (stored, compression) = match self.compression {
            CompressionType::Zstd
                if object_type == ObjectType::Blob && payload.len() >= COMPRESSION_THRESHOLD =>
            {
                (compress_zstd(payload)?, CompressionType::Zstd)
            }
            _ => (payload.to_vec(), CompressionType::None),
        };
        let header = ObjectHeader::new(object_type, compression, stored.len() as u64);

        let shard = obj_path
            .parent()
            .ok_or_else(|| Error::corrupted_object(&obj_path, "object path has no parent"))?;
        fs::create_dir_all(shard)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(shard)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(&stored)?;
        temp_file.flush()?;
        temp_file.persist(&obj_path)?;

        Ok(())
    }

    /// Read an object, check its type and verify its identity.
    fn read_object(&self, hash: &Hash, expected: ObjectType) -> Result<Vec<u8>> {
        let obj_path = self.object_path(hash);
        let mut file = match fs::File::open(&obj_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::object_not_found(hash.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut stored = Vec::new();
        file.read_to_end(&mut stored)?;
        // A truncated file fails here as CorruptedObject.
        let header = ObjectHeader::decode(&obj_path, &stored)?;
        let stored = stored.split_off(HEADER_SIZE);

        if header.object_type != expected {
            return Err(Error::invalid_object_type(
                expected.as_str(),
                header.object_type.as_str(),
            ));
        }

        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_object(
                &obj_path,
                format!(
                    "Payload length mismatch: expected {}, got {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        let payload = match header.compression {
            CompressionType::None => stored,
            CompressionType::Zstd => decompress_zstd(&stored)?,
        };

        let computed = match expected {
            ObjectType::Blob => Hash::of_blob(&payload),
            ObjectType::Tree => Hash::of_tree(&payload),
        };
        if computed != *hash {
            return Err(Error::corrupted_object(
                &obj_path,
                format!("Hash mismatch: expected {}, got {}", hash, computed),
            ));
        }

        Ok(payload)
    }
}

impl ObjectStore for DiskStore {
    fn put_blob(&self, content: &[u8]) -> Result<Hash> {
        let hash = Hash::of_blob(content);
        self.write_object(&hash, ObjectType::Blob, content)?;
        Ok(hash)
    }

    fn get_blob(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.read_object(hash, ObjectType::Blob)
    }

    fn put_tree(&self, tree: &Tree) -> Result<Hash> {
        let payload = tree::encode_tree(tree)?;
        let hash = Hash::of_tree(&payload);
        self.write_object(&hash, ObjectType::Tree, &payload)?;
        Ok(hash)
    }

    fn get_tree(&self, hash: &Hash) -> Result<Tree> {
        let payload = self.read_object(hash, ObjectType::Tree)?;
        tree::decode_tree(&payload)
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.object_path(hash).exists()
    }
}

/// Compress data using zstd.
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3) // Level 3 = fast compression
        .map_err(|e| Error::compression(format!("zstd compression failed: {}", e)))
}

/// Decompress data using zstd.
fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| Error::compression(format!("zstd decompression failed: {}", e)))
}
