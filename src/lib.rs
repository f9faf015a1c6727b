//! Periodic Git backups of a working directory.
//!
//! A [`BackupService`](service::BackupService) hosts a
//! [`BackupEngine`](engine::BackupEngine): on a timer or on demand the engine
//! checks for changes, stages and commits them with a templated message, and
//! pushes to the configured remote. Progress and errors surface on a one-line
//! [`StatusIndicator`](status::StatusIndicator).

pub mod config;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod git_client;
pub mod repo_status;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod vcs;

#[cfg(test)]
mod testutil;
