//! JSONL metrics sink.
//!
//! One JSON object per line:
//!
//! ```json
//! {"step": 10, "values": {"train/loss": 2.5, "train/loss_rss": 1.1}, "timestamp": "2026-01-01T12:00:00+00:00"}
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ddsp_core::{LossBreakdown, Result};

/// Appends metric records to a JSONL file.
pub struct MetricsJsonl {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl MetricsJsonl {
    /// Open (or create) the metrics file for appending.
    ///
    /// Records from earlier runs in the same experiment are kept, so a resumed
    /// run continues the same file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Path to the metrics file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record and flush it.
    pub fn write(&mut self, step: usize, values: &LossBreakdown) -> Result<()> {
        let entry = serde_json::json!({
            "step": step,
            "values": values,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let line = serde_json::to_string(&entry)
            .map_err(|e| ddsp_core::DdspError::Serialization(e.to_string()))?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}
