//! Persisted per-file metadata for a working copy.
//!
//! The index lets a re-export skip hashing files whose size and
//! modification time are unchanged since the cache last saw them. It is a
//! pure accelerator: a missing, stale or unreadable index only costs
//! rehashing, never correctness.

use crate::error::Result;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const INDEX_VERSION: u32 = 1;

/// A point in time with nanosecond precision, relative to the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Stamp {
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

impl From<SystemTime> for Stamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Stamp {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Stamp {
                        secs: -(d.as_secs() as i64),
                        nanos: 0,
                    }
                } else {
                    Stamp {
                        secs: -(d.as_secs() as i64) - 1,
                        nanos: 1_000_000_000 - d.subsec_nanos(),
                    }
                }
            }
        }
    }
}

/// What the cache last observed at one working-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub size: u64,
    pub mtime: Stamp,
    pub hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCache {
    version: u32,
    work_dir: PathBuf,
    written_at: Stamp,
    entries: BTreeMap<String, IndexEntry>,
}

impl IndexCache {
    /// An empty index for `work_dir`.
    pub fn new(work_dir: &Path) -> Self {
        Self {
            version: INDEX_VERSION,
            work_dir: work_dir.to_path_buf(),
            written_at: Stamp::default(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the index at `path`, or start empty if it is absent, unreadable,
    /// or was written for a different working directory.
    pub fn load(path: &Path, work_dir: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(work_dir));
            }
            Err(e) => return Err(e.into()),
        };

        let cache: IndexCache = match serde_json::from_slice(&bytes) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(index = %path.display(), error = %e, "discarding unreadable index cache");
                return Ok(Self::new(work_dir));
            }
        };

        if cache.version != INDEX_VERSION || cache.work_dir != work_dir {
            debug!(
                index = %path.display(),
                cached = %cache.work_dir.display(),
                "index cache belongs to another working copy"
            );
            return Ok(Self::new(work_dir));
        }
        Ok(cache)
    }

    /// The recorded hash of `rel`, if the file's metadata still matches.
    ///
    /// An entry whose mtime falls in or after the second the index was
    /// saved is never trusted: the file could have changed again within the
    /// filesystem's timestamp granularity.
    pub fn lookup(&self, rel: &str, metadata: &fs::Metadata) -> Option<Hash> {
        let entry = self.entries.get(rel)?;
        let mtime = Stamp::from(metadata.modified().ok()?);
        let fresh = entry.size == metadata.len()
            && entry.mtime == mtime
            && entry.mtime.secs < self.written_at.secs;
        fresh.then_some(entry.hash)
    }

    /// Remember that `rel` with this metadata has content `hash`.
    pub fn record(&mut self, rel: &str, metadata: &fs::Metadata, hash: Hash) {
        let Ok(modified) = metadata.modified() else {
            self.entries.remove(rel);
            return;
        };
        self.entries.insert(
            rel.to_string(),
            IndexEntry {
                size: metadata.len(),
                mtime: Stamp::from(modified),
                hash,
            },
        );
    }

    pub fn forget(&mut self, rel: &str) {
        self.entries.remove(rel);
    }

    /// Drop entries for paths that no longer belong to the working copy.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index atomically to `path`, stamping it with the current time.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.written_at = Stamp::now();
        let json = serde_json::to_vec(self)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(&json)?;
        temp_file.flush()?;
        temp_file.persist(path)?;

        debug!(index = %path.display(), entries = self.entries.len(), "saved index cache");
        Ok(())
    }
}
