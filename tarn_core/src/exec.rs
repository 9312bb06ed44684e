//! Running external commands with streamed, incrementally decoded output.

use crate::decode::{DecodeErrors, Encoding, IncrementalDecoder};
use crate::error::{Error, ProcessError, Result};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// Default read size for process output.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Settings threaded into a [`Harness`] instead of process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    pub encoding: Encoding,
    pub errors: DecodeErrors,
    /// Bytes requested per read from the output pipe.
    pub chunk_size: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            errors: DecodeErrors::Replace,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A command to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
    /// Program and arguments, run directly.
    Exec(Vec<OsString>),
    /// A single string handed to the platform shell.
    Shell(String),
}

impl ProcessCommand {
    pub fn exec<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        ProcessCommand::Exec(args.into_iter().map(Into::into).collect())
    }

    pub fn shell(script: impl Into<String>) -> Self {
        ProcessCommand::Shell(script.into())
    }

    fn to_command(&self) -> Result<Command> {
        match self {
            ProcessCommand::Exec(args) => {
                let (program, rest) = args.split_first().ok_or_else(|| Error::InvalidCommand {
                    reason: "empty argument vector".to_string(),
                })?;
                let mut command = Command::new(program);
                command.args(rest);
                Ok(command)
            }
            ProcessCommand::Shell(script) => {
                let mut command = if cfg!(windows) {
                    let mut command = Command::new("cmd");
                    command.arg("/C");
                    command
                } else {
                    let mut command = Command::new("sh");
                    command.arg("-c");
                    command
                };
                command.arg(script);
                Ok(command)
            }
        }
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessCommand::Exec(args) => {
                let words: Vec<_> = args.iter().map(|a| a.to_string_lossy()).collect();
                write!(f, "{}", words.join(" "))
            }
            ProcessCommand::Shell(script) => write!(f, "{}", script),
        }
    }
}

/// Where a running job reports its progress.
///
/// `start` and `finish` bracket every run, including runs whose process
/// never spawned.
pub trait DisplayHandle: Send {
    fn start(&mut self) {}

    fn write(&mut self, text: &str);

    fn finish(&mut self) {}
}

/// A display that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplayHandle for NullDisplay {
    fn write(&mut self, _text: &str) {}
}

/// Holds a display handle between `start` and `finish`.
struct DisplayGuard<'a> {
    handle: &'a mut dyn DisplayHandle,
}

impl<'a> DisplayGuard<'a> {
    fn new(handle: &'a mut dyn DisplayHandle) -> Self {
        handle.start();
        Self { handle }
    }

    fn write(&mut self, text: &str) {
        self.handle.write(text);
    }
}

impl Drop for DisplayGuard<'_> {
    fn drop(&mut self) {
        self.handle.finish();
    }
}

/// Runs external commands for the cache and its plugins.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run `command` in `cwd` and return everything it printed.
    ///
    /// Stdin is closed. Stdout and stderr share one pipe, so the returned
    /// text keeps the order the process wrote it in. Output is decoded
    /// chunk by chunk and forwarded to `display` as it arrives. A nonzero
    /// exit fails with [`Error::Process`] carrying the output. The child is
    /// killed if this future is dropped.
    pub async fn run_with_capture(
        &self,
        command: &ProcessCommand,
        display: &mut dyn DisplayHandle,
        cwd: &Path,
    ) -> Result<String> {
        let mut display = DisplayGuard::new(display);

        let (reader, writer) = io::pipe()?;
        // The command owns the parent's copies of the write end; it must be
        // dropped before reading or the pipe never reaches EOF.
        let mut child = {
            let mut process = command.to_command()?;
            process
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer)
                .kill_on_drop(true);
            process.spawn().map_err(|source| Error::Spawn {
                command: command.to_string(),
                source,
            })?
        };
        debug!(command = %command, cwd = %cwd.display(), "spawned process");

        let chunk_size = self.config.chunk_size.max(1);
        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || pump_output(reader, chunk_size, tx));

        let mut decoder = IncrementalDecoder::new(self.config.encoding, self.config.errors);
        let mut output = String::new();
        while let Some(chunk) = rx.recv().await {
            let text = decoder.decode(&chunk?, false)?;
            display.write(&text);
            output.push_str(&text);
        }

        let status = child.wait().await?;
        debug!(command = %command, status = %status, "process exited");

        if !status.success() {
            return Err(ProcessError {
                exit_code: status.code(),
                command: command.to_string(),
                output,
            }
            .into());
        }

        if !decoder.pending().is_empty() {
            return Err(Error::DecoderNotEmpty {
                pending: decoder.pending().to_vec(),
            });
        }

        Ok(output)
    }
}

/// Chunks buffered between the pipe reader and the decoding task.
const OUTPUT_CHANNEL_DEPTH: usize = 16;

/// Read the merged output pipe until EOF, forwarding each chunk.
///
/// Stops early once the receiving side has gone away.
fn pump_output(
    mut reader: io::PipeReader,
    chunk_size: usize,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
) {
    loop {
        let mut buf = vec![0u8; chunk_size];
        let chunk = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() || failed {
            return;
        }
    }
}
