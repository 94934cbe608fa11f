//! Error types for CLI operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Nothing to ingest
    #[error("No enabled sources in configuration")]
    NoSources,

    /// A pipeline task panicked or was cancelled
    #[error("{task} task failed: {message}")]
    TaskFailed { task: &'static str, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn task_failed(task: &'static str, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            task,
            message: message.into(),
        }
    }
}
