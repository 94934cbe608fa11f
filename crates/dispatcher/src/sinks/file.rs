//! FileSink - appends snapshots to a JSON Lines session file

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use contracts::{ContractError, FusedSnapshot, SnapshotSink};
use tracing::{debug, error, instrument};

use crate::error::DispatcherError;

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory, created if missing
    pub base_path: PathBuf,
    /// File name prefix; the session timestamp is appended
    pub prefix: String,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./output"),
            prefix: "snapshots".to_string(),
        }
    }
}

impl FileSinkConfig {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            base_path: params
                .get("base_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_path),
            prefix: params
                .get("prefix")
                .filter(|p| !p.is_empty())
                .cloned()
                .unwrap_or(defaults.prefix),
        }
    }
}

/// Sink writing one JSON object per line, one file per session
pub struct FileSink {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Result<Self, DispatcherError> {
        let name = name.into();
        fs::create_dir_all(&config.base_path)?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = config
            .base_path
            .join(format!("{}_{}.jsonl", config.prefix, stamp));
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        debug!(sink = %name, path = %path.display(), "FileSink opened");
        Ok(Self {
            name,
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    /// Session file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, snapshot: &FusedSnapshot) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("sink closed"))?;
        serde_json::to_writer(&mut *writer, snapshot)?;
        writer.write_all(b"\n")
    }
}

impl SnapshotSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, tick_id = snapshot.tick_id)
    )]
    async fn write(&mut self, snapshot: &FusedSnapshot) -> Result<(), ContractError> {
        self.append(snapshot).map_err(|e| {
            error!(sink = %self.name, tick_id = snapshot.tick_id, error = %e, "write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush().await?;
        self.writer = None;
        debug!(sink = %self.name, path = %self.path.display(), "FileSink closed");
        Ok(())
    }
}
