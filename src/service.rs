use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::parse_interval;
use crate::engine::{BackupEngine, Trigger};
use crate::error::{SetupError, ValidationError};
use crate::repo_status::lock;
use crate::scheduler::Scheduler;
use crate::status::REFRESH_PERIOD;
use crate::vcs::VersionControlClient;

/// Hosts an engine: its backup timer, the indicator refresh loop, and the
/// settings that need a timer re-arm when they change.
pub struct BackupService<C: VersionControlClient + 'static> {
    engine: Arc<BackupEngine<C>>,
    scheduler: Scheduler,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<C: VersionControlClient + 'static> BackupService<C> {
    pub fn new(engine: BackupEngine<C>) -> Self {
        Self {
            engine: Arc::new(engine),
            scheduler: Scheduler::new(),
            refresh: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<BackupEngine<C>> {
        &self.engine
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }

    /// Attaches to the repository, pulls if configured to, and starts the
    /// timers. A setup error leaves everything stopped.
    pub async fn start(&self) -> Result<(), SetupError> {
        let repo = match self.engine.detect_repository().await {
            Ok(repo) => repo,
            Err(e) => {
                error!(error = %e, "unable to start backups");
                return Err(e);
            }
        };
        info!(
            branch = repo.branch.as_deref().unwrap_or_default(),
            remote = repo.remote.as_deref().unwrap_or_default(),
            "backup service starting"
        );

        if self.engine.settings().auto_pull_on_boot {
            self.engine.pull(Trigger::Boot).await;
        }

        self.rearm();
        let handle = Arc::clone(self.engine.indicator())
            .spawn_refresh(self.engine.clock(), REFRESH_PERIOD);
        if let Some(old) = lock(&self.refresh).replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Cancels the timers, waits for a running cycle to finish, then saves
    /// settings.
    pub async fn stop(&self) {
        self.scheduler.drain().await;
        if let Some(refresh) = lock(&self.refresh).take() {
            refresh.abort();
        }
        self.engine.save_settings();
        info!("backup service stopped");
    }

    pub fn set_interval(&self, minutes: i64) {
        self.engine.set_interval(minutes);
        self.rearm();
    }

    /// Interval as typed by a user. Invalid input keeps the current value.
    pub fn set_interval_input(&self, input: &str) -> Result<i64, ValidationError> {
        let minutes = parse_interval(input)?;
        self.set_interval(minutes);
        Ok(minutes)
    }

    fn rearm(&self) {
        let period = self.engine.settings().interval_period();
        self.scheduler.arm(period, self.engine.clone());
    }
}

impl<C: VersionControlClient + 'static> Drop for BackupService<C> {
    fn drop(&mut self) {
        if let Some(refresh) = lock(&self.refresh).take() {
            refresh.abort();
        }
    }
}
