//! # Tarn Core
//!
//! A content-addressed tree cache that syncs fetched file trees into
//! working directories without clobbering local changes.
//!
//! Directories are imported into immutable BLAKE3-addressed trees, composed
//! with a small tree algebra (merge at a prefix, point edits, listing,
//! reading), and exported into live working copies. An export compares the
//! working copy with the tree it was last synced to and refuses to
//! overwrite anything the cache did not write, unless forced.
//!
//! External fetchers run through an async process harness that starts jobs
//! in a deterministic order and decodes their output incrementally.
//!
//! ## Example
//!
//! ```no_run
//! use tarn_core::{DiskStore, ExportOptions, ImportFilter, TreeStore};
//!
//! # async fn run() -> tarn_core::Result<()> {
//! let cache = TreeStore::new(DiskStore::open_or_init("./tarn-store")?);
//!
//! // Import a directory, then graft it under vendor/lib.
//! let fetched = cache.import_tree("./fetched", &ImportFilter::new()).await?;
//! let layout = cache.merge_trees(None, &fetched, "vendor/lib").await?;
//!
//! // First sync, then an incremental one against the previous tree.
//! cache.export_tree(&layout, "./project", &ExportOptions::new()).await?;
//! let options = ExportOptions::new()
//!     .previous_tree(layout)
//!     .previous_index_file("./tarn-store/index.json");
//! let stats = cache.export_tree(&layout, "./project", &options).await?;
//! println!("wrote {} files", stats.files_written);
//! # Ok(())
//! # }
//! ```

mod algebra;
mod cache;
mod decode;
mod error;
mod exec;
mod gather;
mod hash;
mod index;
mod memory;
mod object;
mod path;
mod plugin;
mod store;
mod sync;
mod tree;
mod walk;

pub use algebra::Change;
pub use cache::TreeStore;
pub use decode::{DecodeErrors, Encoding, IncrementalDecoder};
pub use error::{Error, ProcessError, Result};
pub use exec::{
    DEFAULT_CHUNK_SIZE, DisplayHandle, Harness, HarnessConfig, NullDisplay, ProcessCommand,
};
pub use gather::{StableGather, stable_gather};
pub use hash::Hash;
pub use index::{IndexCache, IndexEntry, Stamp};
pub use memory::MemoryStore;
pub use object::{CompressionType, ObjectHeader, ObjectType};
pub use path::normalize as normalize_path;
pub use plugin::{
    PluginCommand, PluginInvocation, fetch_plugin_tree, parse_plugin_args, parse_reup_output,
    plugin_args, reup_plugin,
};
pub use store::{DiskStore, ObjectStore};
pub use sync::{ExportOptions, SyncStats};
pub use tree::{Entry, EntryKind, FileMode, Tree, decode_tree, encode_tree, file_modes};
pub use walk::ImportFilter;
