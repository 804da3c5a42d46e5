//! Error types for the shell.
//!
//! Only `Syscall` and `Input` are fatal: `main` reports them and exits. The
//! rest are printed inline and the REPL keeps going.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    /// A process or signal-mask primitive failed; the mask may be inconsistent.
    #[error("{op} error: {source}")]
    Syscall {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error("read error: {0}")]
    Input(#[from] io::Error),

    #[error(transparent)]
    Builtin(#[from] BuiltinError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl ShellError {
    pub fn syscall(op: &'static str) -> impl FnOnce(Errno) -> ShellError {
        move |source| ShellError::Syscall { op, source }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Syscall { .. } | ShellError::Input(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid pid {0}")]
    InvalidPid(i32),

    #[error("a live job cannot be in the undefined state")]
    InvalidState,

    #[error("({0}) is already the foreground job")]
    ForegroundTaken(i32),

    #[error("Tried to create too many jobs")]
    TableFull,

    #[error("({0}): No such process")]
    NotFound(i32),
}

/// Recoverable `fg`/`bg` failures. `cmd` is the builtin that was invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuiltinError {
    #[error("{cmd} command requires PID or %jobid argument")]
    MissingTarget { cmd: &'static str },

    #[error("{cmd}: argument must be a PID or %jobid")]
    BadTarget { cmd: &'static str },

    #[error("%{0}: No such job")]
    NoSuchJob(usize),

    #[error("({0}): No such process")]
    NoSuchProcess(i32),
}

/// Detected before forking. A program that exists but fails to exec is
/// reported by the child instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("{0}: Command not found")]
    BadArgument(String),
}

pub type Result<T> = std::result::Result<T, ShellError>;
