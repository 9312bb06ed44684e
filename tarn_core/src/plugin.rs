//! The fetch plugin process protocol.
//!
//! A plugin is invoked as
//!
//! ```text
//! plugin FIELD VALUE ... -- COMMAND ARG ...
//! ```
//!
//! with `fetch DEST CACHE` or `reup CACHE` as the command. `reup` reports
//! the new revision on stdout as `key: value` lines.

use crate::cache::TreeStore;
use crate::error::{Error, Result};
use crate::exec::{DisplayHandle, Harness, ProcessCommand};
use crate::hash::Hash;
use crate::store::ObjectStore;
use crate::walk::ImportFilter;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SEPARATOR: &str = "--";

/// A command a plugin is asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCommand {
    Fetch { dest: PathBuf, cache_path: PathBuf },
    Reup { cache_path: PathBuf },
}

impl PluginCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PluginCommand::Fetch { .. } => "fetch",
            PluginCommand::Reup { .. } => "reup",
        }
    }
}

/// A parsed plugin command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInvocation {
    pub fields: BTreeMap<String, String>,
    pub command: PluginCommand,
}

/// Parse a plugin's arguments (without the program name).
///
/// Fields are read in name/value pairs up to `--`, so a value may itself be
/// `--`. Every name must be in `required` or `optional`, and every required
/// name must be present.
pub fn parse_plugin_args<S: AsRef<str>>(
    args: &[S],
    required: &[&str],
    optional: &[&str],
) -> Result<PluginInvocation> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

    let mut splitter = 0;
    while splitter < args.len() && args[splitter] != SEPARATOR {
        splitter += 2;
    }
    if splitter >= args.len() {
        return Err(Error::plugin("never found \"--\" splitter"));
    }

    let known: BTreeSet<&str> = required.iter().chain(optional).copied().collect();
    let mut fields = BTreeMap::new();
    for pair in args[..splitter].chunks(2) {
        let [name, value] = pair else {
            return Err(Error::plugin("uneven plugin fields"));
        };
        if !known.contains(name) {
            return Err(Error::plugin(format!("unrecognized field name: {}", name)));
        }
        fields.insert(name.to_string(), value.to_string());
    }

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !fields.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::plugin(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let Some((command, command_args)) = args[splitter + 1..].split_first() else {
        return Err(Error::plugin("no command after \"--\""));
    };
    let command = match (*command, command_args) {
        ("fetch", [dest, cache_path]) => PluginCommand::Fetch {
            dest: PathBuf::from(*dest),
            cache_path: PathBuf::from(*cache_path),
        },
        ("reup", [cache_path]) => PluginCommand::Reup {
            cache_path: PathBuf::from(*cache_path),
        },
        ("fetch" | "reup", _) => {
            return Err(Error::plugin(format!(
                "wrong number of arguments for {}: {}",
                command,
                command_args.len()
            )));
        }
        (other, _) => return Err(Error::plugin(format!("unknown command: {}", other))),
    };

    Ok(PluginInvocation { fields, command })
}

/// Build the argument vector [`parse_plugin_args`] reads.
pub fn plugin_args(fields: &BTreeMap<String, String>, command: &PluginCommand) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(fields.len() * 2 + 4);
    for (name, value) in fields {
        args.push(name.into());
        args.push(value.into());
    }
    args.push(SEPARATOR.into());
    args.push(command.name().into());
    match command {
        PluginCommand::Fetch { dest, cache_path } => {
            args.push(dest.into());
            args.push(cache_path.into());
        }
        PluginCommand::Reup { cache_path } => args.push(cache_path.into()),
    }
    args
}

/// Parse the `key: value` lines a `reup` prints. Blank lines are skipped.
pub fn parse_reup_output(output: &str) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| Error::plugin(format!("malformed reup line: {:?}", line)))?;
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(values)
}

/// Run a plugin's `fetch` into a scratch directory and import the result.
///
/// `plugin` is the program and any leading arguments. The plugin runs with
/// `cache_dir` (created if needed) as its working directory. The scratch
/// directory is removed afterwards whether or not the fetch succeeded.
pub async fn fetch_plugin_tree<S: ObjectStore + 'static>(
    harness: &Harness,
    cache: &TreeStore<S>,
    plugin: &[OsString],
    fields: &BTreeMap<String, String>,
    cache_dir: &Path,
    display: &mut dyn DisplayHandle,
) -> Result<Hash> {
    fs::create_dir_all(cache_dir)?;
    let scratch = tempfile::TempDir::new()?;

    let command = PluginCommand::Fetch {
        dest: scratch.path().to_path_buf(),
        cache_path: cache_dir.to_path_buf(),
    };
    let argv = plugin_command(plugin, fields, &command)?;
    debug!(command = %argv, "running plugin fetch");
    harness.run_with_capture(&argv, display, cache_dir).await?;

    let tree = cache.import_tree(scratch.path(), &ImportFilter::new()).await?;
    info!(tree = %tree, "fetched plugin tree");
    Ok(tree)
}

/// Run a plugin's `reup` and return the fields it reported.
pub async fn reup_plugin(
    harness: &Harness,
    plugin: &[OsString],
    fields: &BTreeMap<String, String>,
    cache_dir: &Path,
    display: &mut dyn DisplayHandle,
) -> Result<BTreeMap<String, String>> {
    fs::create_dir_all(cache_dir)?;
    let command = PluginCommand::Reup {
        cache_path: cache_dir.to_path_buf(),
    };
    let argv = plugin_command(plugin, fields, &command)?;
    let output = harness.run_with_capture(&argv, display, cache_dir).await?;
    parse_reup_output(&output)
}

fn plugin_command(
    plugin: &[OsString],
    fields: &BTreeMap<String, String>,
    command: &PluginCommand,
) -> Result<ProcessCommand> {
    if plugin.is_empty() {
        return Err(Error::plugin("no plugin program given"));
    }
    let mut argv = plugin.to_vec();
    argv.extend(plugin_args(fields, command));
    Ok(ProcessCommand::Exec(argv))
}
