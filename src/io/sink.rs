use crate::types::{Alert, RunStatus, WatchResult, Zone};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Receives the outcome of each run exactly once
pub trait PersistenceSink {
    fn save_run(&mut self, zones: &[Zone], alerts: &[Alert], status: RunStatus) -> WatchResult<()>;
}

/// Stored form of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    pub saved_at: DateTime<Utc>,
    pub zones: Vec<Zone>,
    pub alerts: Vec<Alert>,
}

/// Writes one JSON file per run into a directory
#[derive(Debug, Clone)]
pub struct JsonRunSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonRunSink {
    pub fn new(dir: impl Into<PathBuf>) -> WatchResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    /// Files written so far, oldest first
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn read_record<P: AsRef<Path>>(path: P) -> WatchResult<RunRecord> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl PersistenceSink for JsonRunSink {
    fn save_run(&mut self, zones: &[Zone], alerts: &[Alert], status: RunStatus) -> WatchResult<()> {
        let record = RunRecord {
            status,
            saved_at: Utc::now(),
            zones: zones.to_vec(),
            alerts: alerts.to_vec(),
        };
        let name = format!(
            "run_{}_{:03}.json",
            record.saved_at.format("%Y%m%dT%H%M%S%.3f"),
            self.written.len()
        );
        let path = self.dir.join(name);

        // Whole record or nothing: write aside, then move into place
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, &record)?;
        tmp.flush()?;
        tmp.persist_noclobber(&path).map_err(|e| e.error)?;

        log::info!(
            "Saved run ({}): {} zone(s), {} alert(s) -> {}",
            status,
            zones.len(),
            alerts.len(),
            path.display()
        );
        self.written.push(path);
        Ok(())
    }
}
