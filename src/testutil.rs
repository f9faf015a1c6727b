//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use tokio::sync::Notify;

use crate::error::{Operation, OperationError};
use crate::repo_status::lock;
use crate::status::{Clock, Notifier};
use crate::vcs::{
    BranchList, ChangeKind, ChangeSet, FileChange, PullSummary, VersionControlClient,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status,
    Add(String),
    Commit(String),
    Push(String, String),
    Pull(Option<String>, Option<String>),
    CurrentBranch,
    ListBranches,
    Checkout(String),
    RemoteUrl(String),
}

/// Scripted [`VersionControlClient`] that records every call.
#[derive(Debug)]
pub struct FakeClient {
    changes: Mutex<ChangeSet>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Operation, String>>,
    pull_files: usize,
    branch: Mutex<String>,
    remote_url: Option<String>,
    gate: Option<(Operation, Arc<Notify>)>,
    add_delay: Option<Duration>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            changes: Mutex::new(ChangeSet::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            pull_files: 0,
            branch: Mutex::new("main".to_string()),
            remote_url: Some("git@example.com:notes.git".to_string()),
            gate: None,
            add_delay: None,
        }
    }
}

impl FakeClient {
    pub fn with_changes(paths: &[&str]) -> Self {
        let client = Self::default();
        client.set_changes(paths);
        client
    }

    pub fn set_changes(&self, paths: &[&str]) {
        let changes = paths
            .iter()
            .map(|path| FileChange::new(*path, ChangeKind::Modified))
            .collect();
        *lock(&self.changes) = ChangeSet::new(changes);
    }

    pub fn failing(self, op: Operation, message: &str) -> Self {
        lock(&self.failures).insert(op, message.to_string());
        self
    }

    pub fn pulling(mut self, files: usize) -> Self {
        self.pull_files = files;
        self
    }

    pub fn without_remote(mut self) -> Self {
        self.remote_url = None;
        self
    }

    /// Makes calls for `op` wait until the gate is notified.
    pub fn gated(mut self, op: Operation, gate: Arc<Notify>) -> Self {
        self.gate = Some((op, gate));
        self
    }

    /// Makes `add` take `delay` of tokio time.
    pub fn slow_add(mut self, delay: Duration) -> Self {
        self.add_delay = Some(delay);
        self
    }

    /// Moves HEAD behind the engine's back.
    pub fn set_branch(&self, name: &str) {
        *lock(&self.branch) = name.to_string();
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| matches(call)).count()
    }

    async fn wait_gate(&self, op: Operation) {
        if let Some((gated, gate)) = &self.gate {
            if *gated == op {
                gate.notified().await;
            }
        }
    }

    fn record(&self, call: Call, op: Operation) -> Result<(), OperationError> {
        lock(&self.calls).push(call);
        match lock(&self.failures).get(&op) {
            Some(message) => Err(OperationError::new(op, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VersionControlClient for FakeClient {
    async fn status(&self) -> Result<ChangeSet, OperationError> {
        self.record(Call::Status, Operation::Status)?;
        Ok(lock(&self.changes).clone())
    }

    async fn add(&self, pattern: &str) -> Result<(), OperationError> {
        self.wait_gate(Operation::Add).await;
        if let Some(delay) = self.add_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Add(pattern.to_string()), Operation::Add)
    }

    async fn commit(&self, message: &str) -> Result<(), OperationError> {
        self.wait_gate(Operation::Commit).await;
        self.record(Call::Commit(message.to_string()), Operation::Commit)?;
        lock(&self.changes).changes.clear();
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), OperationError> {
        self.wait_gate(Operation::Push).await;
        self.record(
            Call::Push(remote.to_string(), branch.to_string()),
            Operation::Push,
        )
    }

    async fn pull(
        &self,
        remote: Option<&str>,
        branch: Option<&str>,
    ) -> Result<PullSummary, OperationError> {
        self.record(
            Call::Pull(remote.map(str::to_string), branch.map(str::to_string)),
            Operation::Pull,
        )?;
        Ok(PullSummary {
            files_updated: self.pull_files,
        })
    }

    async fn current_branch(&self) -> Result<String, OperationError> {
        self.record(Call::CurrentBranch, Operation::Branch)?;
        Ok(lock(&self.branch).clone())
    }

    async fn list_branches(&self) -> Result<BranchList, OperationError> {
        self.record(Call::ListBranches, Operation::Branch)?;
        let current = lock(&self.branch).clone();
        Ok(BranchList {
            all: vec![current.clone(), "drafts".to_string()],
            current,
        })
    }

    async fn checkout(&self, branch: &str) -> Result<(), OperationError> {
        self.record(Call::Checkout(branch.to_string()), Operation::Checkout)?;
        self.set_branch(branch);
        Ok(())
    }

    async fn remote_url(&self, remote: &str) -> Result<Option<String>, OperationError> {
        self.record(Call::RemoteUrl(remote.to_string()), Operation::Remote)?;
        Ok(self.remote_url.clone())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Local>>);

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    pub fn new_year() -> Arc<Self> {
        Self::new(new_year())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.0);
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *lock(&self.0)
    }
}

pub fn new_year() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[derive(Debug, Default)]
pub struct RecordingNotifier(Mutex<Vec<String>>);

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        lock(&self.0).push(message.to_string());
    }
}
