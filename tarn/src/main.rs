use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tarn_core::{
    CompressionType, DiskStore, Entry, ExportOptions, Harness, HarnessConfig, Hash, ImportFilter,
    NullDisplay, ObjectStore, TreeStore,
};
use tracing_subscriber::EnvFilter;

mod output;

use output::{
    ChangeInfo, DiffOutput, EntryInfo, ExportOutput, ImportOutput, InitOutput, LsOutput,
    OutputWriter, TreeOutput,
};

/// Tarn - A content-addressed tree cache
#[derive(Parser)]
#[command(name = "tarn")]
#[command(about = "Cache fetched file trees and sync them into working directories", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root directory (defaults to TARN_ROOT env var or ./tarn-store)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init {
        /// Compression for large blobs (zstd or none)
        #[arg(long, default_value = "zstd")]
        compression: String,
    },

    /// Import a directory as a tree
    Import {
        /// Directory to import
        dir: PathBuf,

        /// Leave out a path (file or directory, relative to DIR)
        #[arg(long = "exclude", value_name = "PATH")]
        excludes: Vec<String>,

        /// Only include these paths (relative to DIR)
        #[arg(long = "pick", value_name = "PATH")]
        picks: Vec<String>,
    },

    /// Sync a tree into a working directory
    Export {
        /// Tree to export
        tree: String,

        /// Destination directory
        dest: PathBuf,

        /// Tree the destination was last synced to
        #[arg(long)]
        previous: Option<String>,

        /// Index file used to speed up dirty checks
        #[arg(long)]
        index: Option<PathBuf>,

        /// Overwrite local modifications
        #[arg(long)]
        force: bool,
    },

    /// Graft a tree under a prefix of another
    Merge {
        /// Tree to graft
        tree: String,

        /// Where to graft it ("" or "." overlays at the root)
        prefix: String,

        /// Tree to graft into (empty if omitted)
        #[arg(long)]
        base: Option<String>,
    },

    /// Apply point edits to a tree (deletions first, then grafts)
    Modify {
        /// Tree to edit
        tree: String,

        /// Remove a path
        #[arg(long = "delete", value_name = "PATH")]
        deletes: Vec<String>,

        /// Place a tree at a path
        #[arg(long = "graft", value_name = "PATH=TREE")]
        grafts: Vec<String>,
    },

    /// List tree contents
    Ls {
        /// Tree to list
        tree: String,

        /// Path inside the tree
        path: Option<String>,

        /// List every descendant
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Show detailed information
        #[arg(short, long)]
        long: bool,
    },

    /// Output a file's content to stdout
    Cat {
        /// Tree to read from
        tree: String,

        /// Path of the file
        path: String,
    },

    /// Show files that differ between two trees
    Diff {
        /// Old tree
        old: String,

        /// New tree
        new: String,
    },

    /// Run a fetch plugin and import what it produces
    Fetch {
        /// Plugin program
        plugin: PathBuf,

        /// Plugin field
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,

        /// Plugin cache directory (defaults to <root>/plugins)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

const RESULT_ERROR: u8 = 1;
const RESULT_DIRTY: u8 = 2;
const RESULT_CONFLICT: u8 = 3;
const RESULT_PROCESS: u8 = 4;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("tarn=info,tarn_core=info"),
        _ => EnvFilter::new("tarn=debug,tarn_core=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Determine store root: CLI arg > TARN_ROOT env var > ./tarn-store default
    let root = cli
        .root
        .or_else(|| std::env::var("TARN_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./tarn-store"));

    let out = OutputWriter::new(cli.json);
    let result = match cli.command {
        Commands::Init { compression } => cmd_init(&out, &root, &compression),
        Commands::Import {
            dir,
            excludes,
            picks,
        } => cmd_import(&out, &root, &dir, excludes, picks).await,
        Commands::Export {
            tree,
            dest,
            previous,
            index,
            force,
        } => cmd_export(&out, &root, &tree, &dest, previous.as_deref(), index, force).await,
        Commands::Merge { tree, prefix, base } => {
            cmd_merge(&out, &root, &tree, &prefix, base.as_deref()).await
        }
        Commands::Modify {
            tree,
            deletes,
            grafts,
        } => cmd_modify(&out, &root, &tree, deletes, grafts).await,
        Commands::Ls {
            tree,
            path,
            recursive,
            long,
        } => cmd_ls(&out, &root, &tree, path.as_deref(), recursive, long).await,
        Commands::Cat { tree, path } => cmd_cat(&out, &root, &tree, &path).await,
        Commands::Diff { old, new } => cmd_diff(&out, &root, &old, &new).await,
        Commands::Fetch {
            plugin,
            fields,
            cache,
        } => cmd_fetch(&out, &root, plugin, fields, cache).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = result_code(&e);
            out.write_error(&e, code);
            ExitCode::from(code)
        }
    }
}

fn result_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<tarn_core::Error>() {
        Some(e) if e.is_dirty_working_copy() => RESULT_DIRTY,
        Some(e) if e.is_merge_conflict() => RESULT_CONFLICT,
        Some(tarn_core::Error::Process(_)) => RESULT_PROCESS,
        _ => RESULT_ERROR,
    }
}

fn open_cache(root: &Path) -> Result<TreeStore<DiskStore>> {
    let store =
        DiskStore::open(root).with_context(|| format!("Failed to open store at {}", root.display()))?;
    Ok(TreeStore::new(store))
}

fn parse_hash(hash_str: &str) -> Result<Hash> {
    Hash::from_hex(hash_str).with_context(|| format!("Invalid hash: {}", hash_str))
}

fn split_assignment<'a>(arg: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    arg.split_once('=')
        .with_context(|| format!("Expected {} as NAME=VALUE, got {:?}", what, arg))
}

fn cmd_init(out: &OutputWriter, root: &Path, compression: &str) -> Result<()> {
    let compression = CompressionType::parse(compression)
        .with_context(|| format!("Unsupported compression: {}", compression))?;

    DiskStore::init_with(root, compression)
        .with_context(|| format!("Failed to initialize store at {}", root.display()))?;

    let data = InitOutput {
        root: root.display().to_string(),
        compression: compression.as_str().to_string(),
    };
    out.write(&data, || {
        format!(
            "Initialized tarn store at {}\nCompression: {}\n",
            root.display(),
            compression.as_str()
        )
    })
}

async fn cmd_import(
    out: &OutputWriter,
    root: &Path,
    dir: &Path,
    excludes: Vec<String>,
    picks: Vec<String>,
) -> Result<()> {
    let cache = open_cache(root)?;
    let filter = ImportFilter { excludes, picks };
    let tree = cache
        .import_tree(dir, &filter)
        .await
        .with_context(|| format!("Failed to import {}", dir.display()))?;

    let data = ImportOutput {
        tree,
        source: dir.display().to_string(),
    };
    out.write(&data, || format!("{} {}\n", tree, dir.display()))
}

async fn cmd_export(
    out: &OutputWriter,
    root: &Path,
    tree_str: &str,
    dest: &Path,
    previous: Option<&str>,
    index: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let cache = open_cache(root)?;
    let tree = parse_hash(tree_str)?;
    let options = ExportOptions {
        previous_tree: previous.map(parse_hash).transpose()?,
        previous_index_file: index,
        force,
    };

    let stats = cache
        .export_tree(&tree, dest, &options)
        .await
        .with_context(|| format!("Failed to export {} to {}", tree, dest.display()))?;

    let data = ExportOutput {
        tree,
        destination: dest.display().to_string(),
        files_written: stats.files_written,
        files_removed: stats.files_removed,
    };
    out.write(&data, || {
        format!(
            "Exported {} to {} ({} written, {} removed)\n",
            tree,
            dest.display(),
            stats.files_written,
            stats.files_removed
        )
    })
}

async fn cmd_merge(
    out: &OutputWriter,
    root: &Path,
    tree_str: &str,
    prefix: &str,
    base: Option<&str>,
) -> Result<()> {
    let cache = open_cache(root)?;
    let tree = parse_hash(tree_str)?;
    let base = base.map(parse_hash).transpose()?;

    let merged = cache
        .merge_trees(base.as_ref(), &tree, prefix)
        .await
        .with_context(|| format!("Failed to merge {} at {:?}", tree, prefix))?;

    write_tree(out, merged)
}

async fn cmd_modify(
    out: &OutputWriter,
    root: &Path,
    tree_str: &str,
    deletes: Vec<String>,
    grafts: Vec<String>,
) -> Result<()> {
    let cache = open_cache(root)?;
    let tree = parse_hash(tree_str)?;

    let mut modifications: Vec<(String, Option<Entry>)> =
        deletes.into_iter().map(|path| (path, None)).collect();
    for graft in &grafts {
        let (path, hash) = split_assignment(graft, "graft")?;
        modifications.push((path.to_string(), Some(Entry::tree(parse_hash(hash)?))));
    }

    let modified = cache
        .modify_tree(&tree, modifications)
        .await
        .with_context(|| format!("Failed to modify {}", tree))?;

    write_tree(out, modified)
}

fn write_tree(out: &OutputWriter, tree: Hash) -> Result<()> {
    let data = TreeOutput {
        tree,
    };
    out.write(&data, || format!("{}\n", tree))
}

async fn cmd_ls(
    out: &OutputWriter,
    root: &Path,
    tree_str: &str,
    path: Option<&str>,
    recursive: bool,
    long: bool,
) -> Result<()> {
    let cache = open_cache(root)?;
    let tree = parse_hash(tree_str)?;

    let entries = cache
        .ls_tree(&tree, path, recursive)
        .await
        .with_context(|| format!("Failed to list {}", tree))?;

    let entries: Vec<EntryInfo> = entries
        .iter()
        .map(|(path, entry)| EntryInfo::new(path.clone(), entry, long))
        .collect();

    let data = LsOutput { tree, entries };
    out.write(&data, || data.entries.iter().map(EntryInfo::to_line).collect())
}

async fn cmd_cat(out: &OutputWriter, root: &Path, tree_str: &str, path: &str) -> Result<()> {
    let cache = open_cache(root)?;
    let tree = parse_hash(tree_str)?;

    let content = cache
        .read_file(&tree, path)
        .await
        .with_context(|| format!("Failed to read {} from {}", path, tree))?;

    out.write_raw(&content)
}

async fn cmd_diff(out: &OutputWriter, root: &Path, old_str: &str, new_str: &str) -> Result<()> {
    let cache = open_cache(root)?;
    let old = parse_hash(old_str)?;
    let new = parse_hash(new_str)?;

    let changes: Vec<ChangeInfo> = cache
        .diff_trees(Some(&old), Some(&new))
        .await
        .with_context(|| format!("Failed to diff {} and {}", old, new))?
        .into_iter()
        .map(ChangeInfo::from)
        .collect();

    let data = DiffOutput { changes };
    out.write(&data, || data.changes.iter().map(ChangeInfo::to_line).collect())
}

async fn cmd_fetch(
    out: &OutputWriter,
    root: &Path,
    plugin: PathBuf,
    fields: Vec<String>,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let cache = open_cache(root)?;

    let mut plugin_fields = BTreeMap::new();
    for field in &fields {
        let (name, value) = split_assignment(field, "field")?;
        plugin_fields.insert(name.to_string(), value.to_string());
    }
    let cache_dir = cache_dir.unwrap_or_else(|| root.join("plugins"));

    let tree = fetch_tree(&cache, &plugin, &plugin_fields, &cache_dir)
        .await
        .with_context(|| format!("Plugin {} failed", plugin.display()))?;

    write_tree(out, tree)
}

async fn fetch_tree<S: ObjectStore + 'static>(
    cache: &TreeStore<S>,
    plugin: &Path,
    fields: &BTreeMap<String, String>,
    cache_dir: &Path,
) -> Result<Hash> {
    let cache_dir = std::path::absolute(cache_dir)
        .with_context(|| format!("Invalid cache directory: {}", cache_dir.display()))?;
    let argv: Vec<OsString> = vec![plugin_program(plugin)?.into_os_string()];

    let harness = Harness::new(HarnessConfig::default());
    let tree =
        tarn_core::fetch_plugin_tree(&harness, cache, &argv, fields, &cache_dir, &mut NullDisplay)
            .await?;
    Ok(tree)
}

/// Plugins run from inside their cache directory, so a plugin named by a
/// relative path is resolved against ours first. A bare name is left for
/// the PATH lookup.
fn plugin_program(plugin: &Path) -> Result<PathBuf> {
    if plugin.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
        std::path::absolute(plugin)
            .with_context(|| format!("Invalid plugin path: {}", plugin.display()))
    } else {
        Ok(plugin.to_path_buf())
    }
}
