//! The version-control collaborator.
//!
//! The engine never talks to git directly. It drives an implementation of
//! [`VersionControlClient`], which is either the libgit2-backed
//! [`GitClient`](crate::git_client::GitClient) or a fake in tests. All calls are
//! async and fallible; failures come back as [`OperationError`] values.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::OperationError;

/// How a path differs from the last commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Result of one status query. Recomputed every cycle, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub changes: Vec<FileChange>,
}

impl ChangeSet {
    pub fn new(changes: Vec<FileChange>) -> Self {
        Self { changes }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub files_updated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchList {
    pub current: String,
    pub all: Vec<String>,
}

#[async_trait]
pub trait VersionControlClient: Send + Sync {
    async fn status(&self) -> Result<ChangeSet, OperationError>;

    /// Stage everything matching `pattern`, including deletions.
    async fn add(&self, pattern: &str) -> Result<(), OperationError>;

    async fn commit(&self, message: &str) -> Result<(), OperationError>;

    async fn push(&self, remote: &str, branch: &str) -> Result<(), OperationError>;

    /// Bring the remote branch in. `None` means the current branch / default remote.
    async fn pull(
        &self,
        remote: Option<&str>,
        branch: Option<&str>,
    ) -> Result<PullSummary, OperationError>;

    async fn current_branch(&self) -> Result<String, OperationError>;

    async fn list_branches(&self) -> Result<BranchList, OperationError>;

    async fn checkout(&self, branch: &str) -> Result<(), OperationError>;

    /// URL of the named remote, or `None` when it is not configured.
    async fn remote_url(&self, remote: &str) -> Result<Option<String>, OperationError>;
}
