//! The backup cycle state machine.
//!
//! A backup cycle walks `CheckingStatus -> Staging -> Committing -> Pushing`
//! and a pull cycle sits in `Pulling`; both start from and return to `Idle`.
//! Only one cycle can hold the state at a time, so a request that arrives
//! while another cycle runs is turned away with [`CycleOutcome::Busy`].
//!
//! Failures from the version-control client never escape a cycle. They are
//! shown on the status indicator, sent to the notifier, and handed back as
//! [`CycleOutcome::Failed`]; the next trigger starts from scratch.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{validate_date_format, BackupSettings};
use crate::error::{Operation, OperationError, SetupError, ValidationError};
use crate::formatter::{format_message, MessageContext};
use crate::repo_status::{lock, CycleGuard, CycleState, EngineState, RepositoryState};
use crate::status::{Clock, LogNotifier, Notifier, StatusIndicator, SystemClock, MESSAGE_DURATION};
use crate::vcs::{BranchList, ChangeSet, VersionControlClient};

/// Pathspec handed to `add`: everything in the working directory.
pub const STAGE_ALL: &str = ".";

/// Who asked for a cycle. Only manual requests hear about no-op cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
    Boot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoChanges,
    Committed { files: usize, pushed: bool },
    Pulled { files: usize },
    Busy,
    Failed(OperationError),
}

impl CycleOutcome {
    /// Files committed or updated by the cycle.
    pub fn files(&self) -> usize {
        match self {
            CycleOutcome::Committed { files, .. } | CycleOutcome::Pulled { files } => *files,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub cycle: CycleState,
    pub repository: RepositoryState,
    pub pending: ChangeSet,
    pub indicator: String,
}

pub struct BackupEngine<C> {
    client: C,
    state: Arc<EngineState>,
    indicator: Arc<StatusIndicator>,
    settings: Mutex<BackupSettings>,
    settings_path: Option<PathBuf>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<C: VersionControlClient> BackupEngine<C> {
    pub fn new(client: C, settings: BackupSettings) -> Self {
        let state = EngineState::new();
        let indicator = Arc::new(StatusIndicator::new(Arc::clone(&state)));
        Self {
            client,
            state,
            indicator,
            settings: Mutex::new(settings),
            settings_path: None,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// Persist settings to `path` on every change.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn indicator(&self) -> &Arc<StatusIndicator> {
        &self.indicator
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn settings(&self) -> BackupSettings {
        lock(&self.settings).clone()
    }

    /// Resolves the branch and remote the engine syncs against.
    pub async fn detect_repository(&self) -> Result<RepositoryState, SetupError> {
        let remote = self.settings().remote_name().to_string();
        let branch = self
            .client
            .current_branch()
            .await
            .map_err(SetupError::Unreadable)?;

        let url = match self.client.remote_url(&remote).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                return Err(SetupError::RemoteUndetectable {
                    remote,
                    reason: "no such remote is configured".to_string(),
                })
            }
            Err(e) => {
                return Err(SetupError::RemoteUndetectable {
                    remote,
                    reason: e.message,
                })
            }
        };

        info!(branch = %branch, remote = %remote, url = %url, "repository detected");
        self.state
            .set_location(branch.clone(), remote.clone(), Some(url));
        self.update_settings(|s| {
            s.current_branch = Some(branch);
            s.remote = Some(remote);
        });
        Ok(self.state.repository())
    }

    /// One timer-driven backup cycle.
    pub async fn run_backup_cycle(&self) -> CycleOutcome {
        self.backup(Trigger::Timer).await
    }

    /// The "commit all changes and push" command.
    pub async fn commit_and_push(&self) -> CycleOutcome {
        self.backup(Trigger::Manual).await
    }

    /// The "pull from remote" command.
    pub async fn run_pull_cycle(&self) -> CycleOutcome {
        self.pull(Trigger::Manual).await
    }

    pub async fn backup(&self, trigger: Trigger) -> CycleOutcome {
        let Some(cycle) = self.state.try_begin(CycleState::CheckingStatus) else {
            return self.busy(trigger);
        };
        self.indicator.refresh(self.clock.now());

        let outcome = self
            .backup_steps(&cycle)
            .await
            .unwrap_or_else(CycleOutcome::Failed);
        drop(cycle);

        self.report(trigger, &outcome);
        outcome
    }

    async fn backup_steps(&self, cycle: &CycleGuard) -> Result<CycleOutcome, OperationError> {
        let changes = self.client.status().await?;
        if changes.is_empty() {
            return Ok(CycleOutcome::NoChanges);
        }
        let files = changes.len();
        let settings = self.settings();

        self.enter(cycle, CycleState::Staging);
        self.client.add(STAGE_ALL).await?;

        self.enter(cycle, CycleState::Committing);
        let message = self.commit_message(&settings).await?;
        self.client.commit(&message).await?;
        info!(files, message = %message, "committed changes");

        if !settings.auto_push {
            return Ok(CycleOutcome::Committed {
                files,
                pushed: false,
            });
        }

        self.enter(cycle, CycleState::Pushing);
        let (remote, branch) = self.sync_target(&settings).await?;
        self.client.push(&remote, &branch).await?;
        self.state.record_sync(self.clock.now());

        Ok(CycleOutcome::Committed {
            files,
            pushed: true,
        })
    }

    pub async fn pull(&self, trigger: Trigger) -> CycleOutcome {
        let Some(cycle) = self.state.try_begin(CycleState::Pulling) else {
            return self.busy(trigger);
        };
        self.indicator.refresh(self.clock.now());

        let outcome = self.pull_steps().await.unwrap_or_else(CycleOutcome::Failed);
        drop(cycle);

        self.report(trigger, &outcome);
        outcome
    }

    async fn pull_steps(&self) -> Result<CycleOutcome, OperationError> {
        let settings = self.settings();
        let (remote, branch) = self.sync_target(&settings).await?;
        let summary = self.client.pull(Some(&remote), Some(&branch)).await?;
        self.state.record_sync(self.clock.now());
        Ok(CycleOutcome::Pulled {
            files: summary.files_updated,
        })
    }

    /// Renders the commit message. Counting files costs an extra status
    /// query, made only when the template asks for it.
    async fn commit_message(&self, settings: &BackupSettings) -> Result<String, OperationError> {
        let num_files = if settings.needs_file_count() {
            Some(self.client.status().await?.len())
        } else {
            None
        };
        let ctx = MessageContext {
            num_files,
            now: self.clock.now(),
            date_format: &settings.commit_date_format,
        };
        Ok(format_message(&settings.commit_message, &ctx))
    }

    async fn sync_target(&self, settings: &BackupSettings) -> Result<(String, String), OperationError> {
        let repo = self.state.repository();
        let remote = repo
            .remote
            .unwrap_or_else(|| settings.remote_name().to_string());
        // HEAD can move outside the engine between cycles
        let branch = self.client.current_branch().await?;
        if repo.branch.as_deref() != Some(branch.as_str()) {
            info!(branch = %branch, "current branch changed");
            self.state.set_branch(branch.clone());
            self.update_settings(|s| s.current_branch = Some(branch.clone()));
        }
        Ok((remote, branch))
    }

    fn enter(&self, cycle: &CycleGuard, phase: CycleState) {
        cycle.advance(phase);
        self.indicator.refresh(self.clock.now());
    }

    fn busy(&self, trigger: Trigger) -> CycleOutcome {
        match trigger {
            Trigger::Manual => {
                let msg = format!("Busy: {} in progress", self.state.cycle());
                self.indicator
                    .display_message(&msg, MESSAGE_DURATION, self.clock.now());
            }
            Trigger::Timer | Trigger::Boot => {
                debug!(phase = %self.state.cycle(), "cycle already running; request skipped")
            }
        }
        CycleOutcome::Busy
    }

    fn report(&self, trigger: Trigger, outcome: &CycleOutcome) {
        let manual = trigger == Trigger::Manual;
        match outcome {
            CycleOutcome::NoChanges if manual => self.announce("No changes detected"),
            CycleOutcome::NoChanges => debug!("no changes to back up"),
            CycleOutcome::Committed { files, pushed: true } => {
                self.announce(&format!("Pushed {files} files to remote"))
            }
            CycleOutcome::Committed { files, pushed: false } => {
                self.announce(&format!("Committed {files} files"))
            }
            CycleOutcome::Pulled { files: 0 } if manual => self.announce("Everything is up-to-date"),
            CycleOutcome::Pulled { files: 0 } => debug!("pull found nothing new"),
            CycleOutcome::Pulled { files } => {
                self.announce(&format!("Pulled {files} files from remote"))
            }
            CycleOutcome::Failed(err) => self.fail(err),
            CycleOutcome::Busy => {}
        }
        self.indicator.refresh(self.clock.now());
    }

    fn announce(&self, message: &str) {
        info!(notice = %message, "cycle finished");
        self.indicator
            .display_message(message, MESSAGE_DURATION, self.clock.now());
        if !self.settings().disable_notifications {
            self.notifier.notify(message);
        }
    }

    fn fail(&self, err: &OperationError) {
        warn!(op = %err.op, error = %err.message, "version control operation failed");
        let message = err.to_string();
        self.indicator.display_error(&message, self.clock.now());
        if !self.settings().disable_notifications {
            self.notifier.notify(&message);
        }
    }

    pub async fn list_branches(&self) -> Result<BranchList, OperationError> {
        self.client.list_branches().await.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Checks out `branch` and remembers it as the sync target.
    pub async fn switch_branch(&self, branch: &str) -> Result<(), OperationError> {
        // checkout rewrites the working tree under a running cycle
        if !self.state.is_idle() {
            let err = OperationError::new(
                Operation::Checkout,
                format!("cannot switch branches while {}", self.state.cycle()),
            );
            self.fail(&err);
            return Err(err);
        }

        if let Err(err) = self.client.checkout(branch).await {
            self.fail(&err);
            return Err(err);
        }
        self.state.set_branch(branch.to_string());
        self.update_settings(|s| s.current_branch = Some(branch.to_string()));
        self.announce(&format!("Checked out {branch}"));
        Ok(())
    }

    pub async fn status_report(&self) -> Result<StatusReport, OperationError> {
        let pending = self.client.status().await?;
        self.indicator.refresh(self.clock.now());
        Ok(StatusReport {
            cycle: self.state.cycle(),
            repository: self.state.repository(),
            pending,
            indicator: self.indicator.text(),
        })
    }

    /// Stores a new interval and returns the timer period it maps to.
    pub fn set_interval(&self, minutes: i64) -> Option<Duration> {
        self.update_settings(|s| s.auto_save_interval = minutes)
            .interval_period()
    }

    pub fn set_commit_message(&self, template: &str) {
        self.update_settings(|s| s.commit_message = template.to_string());
    }

    pub fn set_date_format(&self, format: &str) -> Result<(), ValidationError> {
        validate_date_format(format)?;
        self.update_settings(|s| s.commit_date_format = format.to_string());
        Ok(())
    }

    pub fn set_auto_pull_on_boot(&self, enabled: bool) {
        self.update_settings(|s| s.auto_pull_on_boot = enabled);
    }

    pub fn set_auto_push(&self, enabled: bool) {
        self.update_settings(|s| s.auto_push = enabled);
    }

    pub fn set_disable_notifications(&self, disabled: bool) {
        self.update_settings(|s| s.disable_notifications = disabled);
    }

    pub fn save_settings(&self) {
        self.persist(&self.settings());
    }

    fn update_settings(&self, change: impl FnOnce(&mut BackupSettings)) -> BackupSettings {
        let snapshot = {
            let mut settings = lock(&self.settings);
            change(&mut settings);
            settings.clone()
        };
        self.persist(&snapshot);
        snapshot
    }

    fn persist(&self, settings: &BackupSettings) {
        let Some(path) = &self.settings_path else {
            return;
        };
        if let Err(e) = settings.save_to_path(path) {
            warn!(path = %path.display(), error = %e, "unable to save settings");
        }
    }
}
