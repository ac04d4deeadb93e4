//! External collaborator seam: structured command lines and their execution.
//!
//! The actual Qiita API traffic is delegated to external programs
//! (`qiita-item`, `qiita-image-upload`). This module defines a single trait
//! ([`CommandRunner`]) and the concrete [`SystemRunner`] so the dispatchers in
//! [`crate::publish`] can be exercised against a mock that returns canned JSON
//! instead of spawning real processes.
//!
//! # Interface
//! - [`CommandLine`] is an ordered list of discrete argument tokens. Tokens
//!   are handed to the OS as an argv, never through a shell, so no shell
//!   quoting or escaping applies at execution time. A token can be marked
//!   quoted, which only affects how it renders in the echoed `## ` line.
//! - [`CommandRunner::run`] blocks until the command exits and returns its
//!   captured stdout. A non-zero exit is not an error here: whatever the
//!   collaborator printed is still handed to the JSON parser, which is where
//!   a failure surfaces.
//!
//! # Mocking & Testing
//! The trait is annotated for `mockall`; see the dispatcher tests for
//! deterministic mocks asserting on the assembled argv.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: String,
    quoted: bool,
}

/// An assembled collaborator invocation: program name plus argument tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<Arg>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument token.
    pub fn arg(&mut self, value: impl Into<String>) -> &mut Self {
        self.args.push(Arg {
            value: value.into(),
            quoted: false,
        });
        self
    }

    /// Appends one argument token that renders double-quoted in the echoed
    /// command line (the collaborator still receives the bare value).
    pub fn arg_quoted(&mut self, value: impl Into<String>) -> &mut Self {
        self.args.push(Arg {
            value: value.into(),
            quoted: true,
        });
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The raw argument values, in order, as passed to the OS.
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(|arg| arg.value.as_str()).collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.quoted {
                write!(f, " \"{}\"", arg.value)?;
            } else {
                write!(f, " {}", arg.value)?;
            }
        }
        Ok(())
    }
}

/// Executes collaborator commands and captures their stdout.
/// Implemented by [`SystemRunner`] for real use and by mocks in tests.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Runs the command, blocking until it exits, and returns captured stdout.
    fn run(&self, command: &CommandLine) -> Result<String>;
}

/// Runs collaborator commands as real OS processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandLine) -> Result<String> {
        let program = resolve_program(command.program());
        debug!(program = %program.display(), args = ?command.argv(), "Invoking collaborator command");

        let output = Command::new(&program)
            .args(command.argv())
            .output()
            .with_context(|| format!("failed to run collaborator command {}", program.display()))?;

        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr), "Collaborator stderr");
        }
        if !output.status.success() {
            // Not fatal by itself; the response parse decides.
            debug!(status = ?output.status, "Collaborator exited non-zero");
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("collaborator {} produced non-UTF-8 output", program.display()))
    }
}

/// Collaborator programs historically live next to the driver itself, so a
/// sibling of the current executable wins when it exists; otherwise the bare
/// name is handed to the OS for a `PATH` lookup.
pub fn resolve_program(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(name);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from(name)
}
