use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::BackupEngine;
use crate::repo_status::lock;
use crate::vcs::VersionControlClient;

/// Work run on every timer tick.
#[async_trait]
pub trait Tick: Send + Sync {
    async fn tick(&self);
}

#[async_trait]
impl<C: VersionControlClient + 'static> Tick for BackupEngine<C> {
    async fn tick(&self) {
        let outcome = self.run_backup_cycle().await;
        debug!(?outcome, "scheduled backup finished");
    }
}

/// Owns the single repeating backup timer and the cycles it has started.
#[derive(Debug, Default)]
pub struct Scheduler {
    timer: Mutex<Option<JoinHandle<()>>>,
    cycles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the current timer, then starts a new one if `period` is set.
    /// Both steps happen under one lock, so two timers never coexist.
    pub fn arm(&self, period: Option<Duration>, job: Arc<dyn Tick>) {
        let mut timer = lock(&self.timer);
        if let Some(old) = timer.take() {
            old.abort();
            debug!("backup timer cancelled");
        }

        let Some(period) = period else {
            info!("automatic backups disabled");
            return;
        };

        let cycles = Arc::clone(&self.cycles);
        *timer = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // A started cycle must finish even if the timer is cancelled
                // mid-run, so it gets its own task.
                let job = Arc::clone(&job);
                let mut running = lock(&cycles);
                running.retain(|cycle| !cycle.is_finished());
                running.push(tokio::spawn(async move { job.tick().await }));
            }
        }));
        info!(period = ?period, "automatic backups scheduled");
    }

    pub fn cancel(&self) {
        if let Some(old) = lock(&self.timer).take() {
            old.abort();
            debug!("backup timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Cancels the timer and waits for every cycle it started to finish.
    pub async fn drain(&self) {
        self.cancel();
        let running = std::mem::take(&mut *lock(&self.cycles));
        if !running.is_empty() {
            info!(cycles = running.len(), "waiting for running backups to finish");
        }
        for cycle in running {
            if let Err(e) = cycle.await {
                warn!(error = %e, "backup cycle task failed");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
