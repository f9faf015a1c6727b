use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;

/// What the engine is doing right now. Exactly one value is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    CheckingStatus,
    Staging,
    Committing,
    Pushing,
    Pulling,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::CheckingStatus => "checking status",
            CycleState::Staging => "staging",
            CycleState::Committing => "committing",
            CycleState::Pushing => "pushing",
            CycleState::Pulling => "pulling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryState {
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub remote_url: Option<String>,
    pub last_sync: Option<DateTime<Local>>,
}

/// State shared by the engine (writer) and the status indicator (reader).
#[derive(Debug, Default)]
pub struct EngineState {
    cycle: Mutex<CycleState>,
    repo: Mutex<RepositoryState>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EngineState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cycle(&self) -> CycleState {
        *lock(&self.cycle)
    }

    pub fn is_idle(&self) -> bool {
        self.cycle() == CycleState::Idle
    }

    /// Moves from Idle to `phase`, or returns `None` when a cycle is already
    /// running. The returned guard puts the state back to Idle when dropped.
    pub fn try_begin(self: &Arc<Self>, phase: CycleState) -> Option<CycleGuard> {
        let mut cycle = lock(&self.cycle);
        if *cycle != CycleState::Idle {
            return None;
        }
        *cycle = phase;
        tracing::debug!(phase = %phase, "cycle started");
        Some(CycleGuard {
            state: Arc::clone(self),
        })
    }

    pub fn repository(&self) -> RepositoryState {
        lock(&self.repo).clone()
    }

    pub fn last_sync(&self) -> Option<DateTime<Local>> {
        lock(&self.repo).last_sync
    }

    pub fn record_sync(&self, at: DateTime<Local>) {
        lock(&self.repo).last_sync = Some(at);
    }

    pub fn set_location(&self, branch: String, remote: String, remote_url: Option<String>) {
        let mut repo = lock(&self.repo);
        repo.branch = Some(branch);
        repo.remote = Some(remote);
        repo.remote_url = remote_url;
    }

    pub fn set_branch(&self, branch: String) {
        lock(&self.repo).branch = Some(branch);
    }
}

/// Proof that a cycle owns the state machine.
#[derive(Debug)]
pub struct CycleGuard {
    state: Arc<EngineState>,
}

impl CycleGuard {
    pub fn advance(&self, phase: CycleState) {
        *lock(&self.state.cycle) = phase;
        tracing::debug!(phase = %phase, "cycle advanced");
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        *lock(&self.state.cycle) = CycleState::Idle;
    }
}
