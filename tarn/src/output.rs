//! Text and JSON rendering of command results.
//!
//! Every JSON document carries `success` and `result_code` next to the
//! command-specific fields, so scripts can branch on one shape.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};
use tarn_core::{Change, Entry, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Envelope around a command's payload.
#[derive(Serialize)]
struct Reply<'a, T: Serialize> {
    success: bool,
    result_code: u8,
    #[serde(flatten)]
    data: &'a T,
}

pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        let format = if json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        Self { format }
    }

    /// Print a successful result. `text_fn` only runs in text mode.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        let mut stdout = io::stdout().lock();
        match self.format {
            OutputFormat::Json => {
                let reply = Reply {
                    success: true,
                    result_code: 0,
                    data,
                };
                serde_json::to_writer_pretty(&mut stdout, &reply)?;
                writeln!(stdout)?;
            }
            OutputFormat::Text => stdout.write_all(text_fn().as_bytes())?,
        }
        stdout.flush()?;
        Ok(())
    }

    /// File content goes out untouched in both formats.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()?;
        Ok(())
    }

    /// Report a failure on stderr, including the whole context chain.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        let mut stderr = io::stderr().lock();
        let _ = match self.format {
            OutputFormat::Json => {
                let reply = Reply {
                    success: false,
                    result_code,
                    data: &ErrorOutput {
                        error: format!("{:#}", error),
                    },
                };
                serde_json::to_writer_pretty(&mut stderr, &reply)
                    .map_err(io::Error::from)
                    .and_then(|()| writeln!(stderr))
            }
            OutputFormat::Text => writeln!(stderr, "Error: {:#}", error),
        };
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub root: String,
    pub compression: String,
}

#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub tree: Hash,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ExportOutput {
    pub tree: Hash,
    pub destination: String,
    pub files_written: usize,
    pub files_removed: usize,
}

/// Result of `merge`, `modify` and `fetch`: a single new tree.
#[derive(Debug, Serialize)]
pub struct TreeOutput {
    pub tree: Hash,
}

/// One `ls` line. Mode and hash are only filled in for `--long`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path: String,
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
}

impl EntryInfo {
    pub fn new(path: String, entry: &Entry, long: bool) -> Self {
        Self {
            path,
            entry_type: entry.kind.as_str().to_string(),
            mode: long.then(|| format!("{:06o}", entry.mode)),
            hash: long.then_some(entry.hash),
        }
    }

    pub fn to_line(&self) -> String {
        match (&self.mode, &self.hash) {
            (Some(mode), Some(hash)) => {
                let type_char = if self.entry_type == "tree" { 't' } else { 'b' };
                format!("{} {} {} {}\n", type_char, mode, hash, self.path)
            }
            _ => format!("{}\n", self.path),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub tree: Hash,
    pub entries: Vec<EntryInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeInfo {
    pub path: String,
    pub change: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Hash>,
}

impl ChangeInfo {
    pub fn to_line(&self) -> String {
        let marker = match self.change.as_str() {
            "added" => 'A',
            "removed" => 'D',
            _ => 'M',
        };
        format!("{} {}\n", marker, self.path)
    }
}

impl From<Change> for ChangeInfo {
    fn from(change: Change) -> Self {
        let kind = if change.is_added() {
            "added"
        } else if change.is_removed() {
            "removed"
        } else {
            "modified"
        };
        Self {
            path: change.path,
            change: kind.to_string(),
            old: change.old.map(|e| e.hash),
            new: change.new.map(|e| e.hash),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiffOutput {
    pub changes: Vec<ChangeInfo>,
}
