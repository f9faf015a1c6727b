use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Raised while attaching to a repository. Fatal to `start()`: nothing else runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no git repository found at {path}: {reason}")]
    RepositoryNotFound { path: PathBuf, reason: String },
    #[error("{path} is a bare repository; a working directory is required")]
    BareRepository { path: PathBuf },
    #[error("unable to detect remote `{remote}`: {reason}")]
    RemoteUndetectable { remote: String, reason: String },
    #[error("unable to read repository state: {0}")]
    Unreadable(#[source] OperationError),
}

/// The version-control call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Status,
    Add,
    Commit,
    Push,
    Pull,
    Branch,
    Checkout,
    Remote,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Status => "status",
            Operation::Add => "add",
            Operation::Commit => "commit",
            Operation::Push => "push",
            Operation::Pull => "pull",
            Operation::Branch => "branch",
            Operation::Checkout => "checkout",
            Operation::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// A failed add/commit/push/pull/checkout. Never fatal: the cycle aborts and
/// the next trigger may try again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} failed: {message}")]
pub struct OperationError {
    pub op: Operation,
    pub message: String,
}

impl OperationError {
    pub fn new(op: Operation, message: impl fmt::Display) -> Self {
        Self {
            op,
            message: message.to_string(),
        }
    }
}

/// Bad input at the configuration boundary. The previous value is kept.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{0}` is not a whole number of minutes")]
    InvalidInterval(String),
    #[error("`{0}` is not a usable date format")]
    InvalidDateFormat(String),
}
