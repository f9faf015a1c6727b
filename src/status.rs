//! The one-line status indicator and the notification channel.
//!
//! The indicator has two inputs. The phase line is derived from the shared
//! [`EngineState`] on every refresh. A transient message (info or error)
//! overrides it until its deadline passes; refreshes before that are no-ops.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::repo_status::{lock, CycleState, EngineState};

pub const MESSAGE_MAX_LEN: usize = 100;
pub const MESSAGE_DURATION: Duration = Duration::from_secs(4);
pub const ERROR_DURATION: Duration = Duration::from_secs(10);
pub const REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Source of wall-clock time for the engine and the indicator.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Transient, user-facing notices (the toast next to the status line).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Emits notices as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "vault_backup::notice", "{message}");
    }
}

#[derive(Debug, Default)]
struct Line {
    text: String,
    suppressed_until: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub struct StatusIndicator {
    state: Arc<EngineState>,
    line: Mutex<Line>,
}

impl StatusIndicator {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            line: Mutex::new(Line::default()),
        }
    }

    fn line(&self) -> MutexGuard<'_, Line> {
        lock(&self.line)
    }

    /// The line currently shown.
    pub fn text(&self) -> String {
        self.line().text.clone()
    }

    pub fn is_suppressed(&self, now: DateTime<Local>) -> bool {
        matches!(self.line().suppressed_until, Some(until) if now < until)
    }

    /// Shows `message` and holds off phase updates for `duration`.
    pub fn display_message(&self, message: &str, duration: Duration, now: DateTime<Local>) {
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        let mut current = self.line();
        current.text = format!("git: {}", normalize(message));
        current.suppressed_until = until;
    }

    pub fn display_error(&self, message: &str, now: DateTime<Local>) {
        self.display_message(message, ERROR_DURATION, now);
    }

    /// Redraws the phase line unless a transient message is still up.
    /// Returns whether the text changed.
    pub fn refresh(&self, now: DateTime<Local>) -> bool {
        let mut current = self.line();
        if matches!(current.suppressed_until, Some(until) if now < until) {
            return false;
        }
        current.suppressed_until = None;

        let line = phase_line(self.state.cycle(), self.state.last_sync(), now);
        if current.text == line {
            return false;
        }
        current.text = line;
        true
    }

    /// Polls [`refresh`](Self::refresh) on a fixed period until aborted.
    pub fn spawn_refresh(self: Arc<Self>, clock: Arc<dyn Clock>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if self.refresh(clock.now()) {
                    debug!(status = %self.text(), "status changed");
                }
            }
        })
    }
}

fn normalize(message: &str) -> String {
    message.to_lowercase().chars().take(MESSAGE_MAX_LEN).collect()
}

pub fn phase_line(cycle: CycleState, last_sync: Option<DateTime<Local>>, now: DateTime<Local>) -> String {
    match cycle {
        CycleState::Idle => match last_sync {
            Some(at) => format!("git: last update {}", time_since(at, now)),
            None => "git: ready".to_string(),
        },
        CycleState::CheckingStatus => "git: checking repo status...".to_string(),
        CycleState::Staging => "git: adding files to repo...".to_string(),
        CycleState::Committing => "git: committing changes...".to_string(),
        CycleState::Pushing => "git: pushing changes...".to_string(),
        CycleState::Pulling => "git: pulling changes...".to_string(),
    }
}

/// "5 minutes ago" style rendering of the gap between `then` and `now`.
pub fn time_since(then: DateTime<Local>, now: DateTime<Local>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let minutes = (secs + 30) / 60;
    let hours = (minutes + 30) / 60;
    let days = (hours + 12) / 24;

    if secs < 45 {
        "a few seconds ago".to_string()
    } else if secs < 90 {
        "a minute ago".to_string()
    } else if minutes < 45 {
        format!("{minutes} minutes ago")
    } else if minutes < 90 {
        "an hour ago".to_string()
    } else if hours < 22 {
        format!("{hours} hours ago")
    } else if hours < 36 {
        "a day ago".to_string()
    } else {
        format!("{days} days ago")
    }
}
