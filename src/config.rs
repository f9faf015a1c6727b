use std::env;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_COMMIT_MESSAGE: &str = "vault backup: {{date}}";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted backup settings. Every field falls back to its default, so a
/// missing file or a partial one both load.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct BackupSettings {
    pub commit_message: String,
    pub commit_date_format: String,
    /// Minutes between automatic backups. Zero or less disables the timer.
    pub auto_save_interval: i64,
    pub auto_pull_on_boot: bool,
    pub auto_push: bool,
    pub disable_notifications: bool,
    // Cached from the repository on start and on branch switches.
    pub current_branch: Option<String>,
    pub remote: Option<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
            commit_date_format: DEFAULT_DATE_FORMAT.to_string(),
            auto_save_interval: 0,
            auto_pull_on_boot: false,
            auto_push: true,
            disable_notifications: false,
            current_branch: None,
            remote: None,
        }
    }
}

impl BackupSettings {
    pub fn default_path() -> PathBuf {
        Self::get_config_home().join("config.toml")
    }

    /// Location of all config. By default
    ///
    /// Linux   :   $XDG_CONFIG_HOME/vault-backup or $HOME/.config/vault-backup
    /// macOS   :   $HOME/Library/Application Support/vault-backup
    /// Windows :   %AppData%\Roaming\vault-backup
    ///
    /// This can be overridden by setting VAULT_BACKUP_CONFIG_HOME.
    fn get_config_home() -> PathBuf {
        if let Ok(env_var) = env::var("VAULT_BACKUP_CONFIG_HOME") {
            if !env_var.is_empty() {
                return env_var.into();
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vault-backup")
    }

    /// Loads settings from `path`; an absent file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(path)
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = toml::from_str(&contents)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Creates parent dirs, serializes `self` as TOML and writes it to `path`.
    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir)
                .with_context(|| format!("creating settings directory {}", dir.display()))?;
        }

        let contents = toml::to_string(self).context("serializing settings")?;
        fs::write(path, contents)
            .with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }

    /// Timer period, converted once from minutes. `None` when disabled.
    pub fn interval_period(&self) -> Option<Duration> {
        interval_period(self.auto_save_interval)
    }

    pub fn remote_name(&self) -> &str {
        self.remote
            .as_deref()
            .unwrap_or(crate::git_client::DEFAULT_REMOTE)
    }

    /// Whether building a commit message needs a fresh changed-file count.
    pub fn needs_file_count(&self) -> bool {
        self.commit_message.contains(crate::formatter::NUM_FILES)
    }
}

pub fn interval_period(minutes: i64) -> Option<Duration> {
    if minutes <= 0 {
        return None;
    }
    let millis = u64::try_from(minutes).ok()?.checked_mul(60_000)?;
    Some(Duration::from_millis(millis))
}

/// Parses an interval typed by a user. Only whole minutes are accepted.
pub fn parse_interval(input: &str) -> Result<i64, ValidationError> {
    input
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidInterval(input.to_string()))
}

/// Rejects strftime strings chrono cannot render.
pub fn validate_date_format(format: &str) -> Result<(), ValidationError> {
    let broken = StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
    if broken {
        return Err(ValidationError::InvalidDateFormat(format.to_string()));
    }
    Ok(())
}
