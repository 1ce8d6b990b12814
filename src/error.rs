//! Closed error taxonomy for the pipeline.
//!
//! Every failure the pipeline can produce fits one of these variants; there
//! is deliberately no catch-all "other" case so that the front end can map
//! each kind to a specific exit path without guessing.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CrispyError>;

#[derive(Debug, thiserror::Error)]
pub enum CrispyError {
    /// The compiler exited non-zero. Carries its stderr and the command line
    /// that produced it.
    #[error("compile failed: {message}\ncommand: {command}")]
    Compile { message: String, command: String },

    /// Opening a produced artifact with the dynamic loader failed.
    #[error("failed to load artifact {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// The entry symbol was missing from an otherwise successfully loaded
    /// artifact.
    #[error("entry symbol not found in {path}")]
    NoEntry { path: PathBuf },

    /// Any filesystem read/write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The shell-expansion subshell failed to launch or exited non-zero.
    #[error("parameter expansion failed: {message}")]
    Params { message: String },

    /// A cache provider operation (purge, enumeration) failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// The compiler backend's constructor could not locate its tool.
    #[error("toolchain not found: {0}")]
    ToolchainNotFound(String),

    /// Plugin engine failure: library open failure, missing descriptor, or a
    /// hook-initiated abort.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Configuration loader failure: compile/load failure, missing
    /// initializer, or an initializer that returned "not applied".
    #[error("config error: {0}")]
    Config(String),
}

impl CrispyError {
    /// Whether this error is expected to be read directly by a human (as
    /// opposed to an internal invariant violation worth a backtrace).
    pub fn is_human(&self) -> bool {
        !matches!(self, CrispyError::Io(_))
    }
}
