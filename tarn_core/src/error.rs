//! Error types for tarn_core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using tarn_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// An external command that exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessError {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// The command line as it was launched.
    pub command: String,
    /// Everything the command wrote to stdout and stderr, decoded.
    pub output: String,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "command exited with code {}: $ {}", code, self.command)?,
            None => write!(f, "command terminated by signal: $ {}", self.command)?,
        }
        if !self.output.is_empty() {
            write!(f, "\n{}", self.output.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcessError {}

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Object file is corrupted or invalid.
    #[error("Corrupted object at {path}: {reason}")]
    CorruptedObject { path: PathBuf, reason: String },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Object not found in store.
    #[error("Object not found: {hash}")]
    ObjectNotFound { hash: String },

    /// Store is invalid or not initialized.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Invalid object type.
    #[error("Invalid object type: expected {expected}, got {got}")]
    InvalidObjectType { expected: String, got: String },

    /// Invalid tree entry.
    #[error("Invalid tree entry: {reason}")]
    InvalidTreeEntry { reason: String },

    /// Compression or decompression failed.
    #[error("Compression error: {reason}")]
    Compression { reason: String },

    /// A filesystem object the cache cannot represent.
    #[error("Unsupported file type: {path}")]
    Unsupported { path: PathBuf },

    /// Tree path that cannot be normalized or used.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The working copy has local changes the cache did not make.
    #[error("Working copy {dest} has local modifications: {}", .paths.join(", "))]
    DirtyWorkingCopy { dest: PathBuf, paths: Vec<String> },

    /// A merge target is already populated.
    #[error("Merge conflict at {prefix:?}: {reason}")]
    MergeConflict { prefix: String, reason: String },

    /// No entry at the given tree path.
    #[error("No such file in tree: {path}")]
    NotFound { path: String },

    /// A file was expected but the path names a directory.
    #[error("Is a directory: {path}")]
    IsADirectory { path: String },

    /// An external command exited with a nonzero status.
    #[error("{0}")]
    Process(ProcessError),

    /// An external command could not be started.
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command description that cannot be executed.
    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// Process output could not be decoded under the strict policy.
    #[error("Failed to decode process output: {reason}")]
    Decode { reason: String },

    /// The incremental decoder still held bytes when the stream ended.
    #[error("Internal error: decoder nonempty at end of stream ({pending:?})")]
    DecoderNotEmpty { pending: Vec<u8> },

    /// The same task key was passed to `stable_gather` more than once.
    #[error("Duplicate task: {key}")]
    DuplicateTask { key: String },

    /// Malformed plugin invocation.
    #[error("Plugin error: {reason}")]
    Plugin { reason: String },

    /// JSON (de)serialization error.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Create a CorruptedObject error.
    pub fn corrupted_object(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(hash: impl Into<String>) -> Self {
        Error::ObjectNotFound { hash: hash.into() }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidObjectType error.
    pub fn invalid_object_type(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::InvalidObjectType {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create an InvalidTreeEntry error.
    pub fn invalid_tree_entry(reason: impl Into<String>) -> Self {
        Error::InvalidTreeEntry {
            reason: reason.into(),
        }
    }

    /// Create a Compression error.
    pub fn compression(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a MergeConflict error.
    pub fn merge_conflict(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MergeConflict {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Error::IsADirectory { path: path.into() }
    }

    /// Create a Plugin error.
    pub fn plugin(reason: impl Into<String>) -> Self {
        Error::Plugin {
            reason: reason.into(),
        }
    }

    /// Whether this error reports local modifications in a working copy.
    pub fn is_dirty_working_copy(&self) -> bool {
        matches!(self, Error::DirtyWorkingCopy { .. })
    }

    /// Whether this error reports a merge into an occupied prefix.
    pub fn is_merge_conflict(&self) -> bool {
        matches!(self, Error::MergeConflict { .. })
    }
}

impl From<ProcessError> for Error {
    fn from(err: ProcessError) -> Self {
        Error::Process(err)
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
