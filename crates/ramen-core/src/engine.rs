//! Script engine backed by an external interpreter process.
//!
//! Stands in for the host application during development: each script is
//! piped to a fresh interpreter (`python3 -` by default) and a non-zero exit
//! status is reported with the captured stderr as the diagnostic. Nothing
//! persists between scripts.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::host::{ScriptEngine, ScriptFailure};

/// Interpreter used when none is given.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Runs each script in a child interpreter process.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandEngine {
    /// Resolve `program` on PATH (or as a path) and build an engine for it.
    ///
    /// The script is written to the interpreter's stdin.
    pub fn new(program: impl AsRef<Path>) -> Result<Self> {
        let program = program.as_ref();
        let resolved = which::which(program).map_err(|e| {
            Error::Interpreter(format!(
                "could not find interpreter '{}': {}",
                program.display(),
                e
            ))
        })?;

        Ok(Self {
            program: resolved,
            args: Vec::new(),
        })
    }

    /// Python reading the script from stdin.
    pub fn python() -> Result<Self> {
        Ok(Self::new(DEFAULT_INTERPRETER)?.with_arg("-"))
    }

    /// Append an argument passed before the script is streamed in.
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Resolved interpreter path.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ScriptEngine for CommandEngine {
    fn execute(&mut self, script: &str) -> std::result::Result<(), ScriptFailure> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScriptFailure::new(format!(
                    "failed to start interpreter '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            // Feed stdin on a side thread so a chatty stderr cannot deadlock us.
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    if let Err(e) = stdin.write_all(script.as_bytes()) {
                        tracing::debug!("Interpreter closed stdin early: {}", e);
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| ScriptFailure::new(format!("failed to wait for interpreter: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim_end();
        if stderr.is_empty() {
            Err(ScriptFailure::new(format!(
                "interpreter exited with {}",
                output.status
            )))
        } else {
            Err(ScriptFailure::new(stderr))
        }
    }
}
