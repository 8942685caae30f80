//! Experiment directory logger: text log, scalar metrics, audio samples,
//! checkpoints and time counters.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use ddsp_core::{Checkpoint, DdspConfig, DdspError, LossBreakdown, Result};

use crate::{CheckpointManager, CheckpointMetadata, MetricsJsonl, TrainingState};

/// A named mono clip to be written as audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Relative file name, e.g. `speaker/utt/pred.wav`.
    pub key: String,
    /// Samples in `[-1, 1]`.
    pub samples: Vec<f32>,
}

impl AudioClip {
    /// Create a clip.
    pub fn new(key: impl Into<String>, samples: Vec<f32>) -> Self {
        Self {
            key: key.into(),
            samples,
        }
    }
}

/// Sink for everything a run records.
pub trait RunLogger {
    /// Record a line of text.
    fn log_info(&mut self, msg: &str) -> Result<()>;

    /// Record scalar metrics at `step`.
    fn log_value(&mut self, step: usize, values: &LossBreakdown) -> Result<()>;

    /// Record audio clips at `step`.
    fn log_audio(&mut self, step: usize, clips: &[AudioClip]) -> Result<()>;

    /// Persist model and optional optimizer state under `postfix`.
    fn save_model<M, O>(
        &mut self,
        model: &M,
        optimizer: Option<&O>,
        postfix: &str,
        state: &TrainingState,
    ) -> Result<PathBuf>
    where
        M: Checkpoint,
        O: Checkpoint;

    /// Time since the previous call, or since creation on the first call.
    fn interval_time(&mut self) -> Duration;

    /// Time since creation.
    fn total_time(&self) -> Duration;
}

/// [`RunLogger`] writing into an experiment directory.
pub struct Saver {
    expdir: PathBuf,
    sampling_rate: u32,
    log_file: File,
    metrics: MetricsJsonl,
    checkpoints: CheckpointManager,
    init_time: Instant,
    last_time: Instant,
}

impl Saver {
    /// Create the experiment directory and its log files.
    pub fn new(expdir: impl AsRef<Path>, sampling_rate: u32) -> Result<Self> {
        let expdir = expdir.as_ref().to_path_buf();
        std::fs::create_dir_all(&expdir)?;

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(expdir.join("log_info.txt"))?;
        let metrics = MetricsJsonl::open(expdir.join("logs").join("metrics.jsonl"))?;
        let checkpoints = CheckpointManager::new(expdir.join("checkpoints"))?;

        let now = Instant::now();
        Ok(Self {
            expdir,
            sampling_rate,
            log_file,
            metrics,
            checkpoints,
            init_time: now,
            last_time: now,
        })
    }

    /// Saver for the experiment described by `config`, with the resolved
    /// configuration written to `config.yaml`.
    pub fn from_config(config: &DdspConfig) -> Result<Self> {
        let saver = Self::new(&config.env.expdir, config.data.sampling_rate)?;
        std::fs::write(saver.expdir.join("config.yaml"), config.to_yaml()?)?;
        Ok(saver)
    }

    /// Experiment directory.
    pub fn expdir(&self) -> &Path {
        &self.expdir
    }

    /// Checkpoint manager rooted at `<expdir>/checkpoints`.
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    fn sample_path(&self, step: usize, key: &str) -> PathBuf {
        self.expdir
            .join("samples")
            .join(format!("step_{}", step))
            .join(sanitize_key(key))
    }
}

/// Relative path for an audio key: only normal components are kept, so
/// absolute keys and `..` cannot leave the samples directory.
fn sanitize_key(key: &str) -> PathBuf {
    let path: PathBuf = Path::new(key)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if path.as_os_str().is_empty() {
        PathBuf::from("unnamed")
    } else {
        path
    }
}

impl RunLogger for Saver {
    fn log_info(&mut self, msg: &str) -> Result<()> {
        tracing::info!("{}", msg);
        writeln!(self.log_file, "{}", msg)?;
        Ok(())
    }

    fn log_value(&mut self, step: usize, values: &LossBreakdown) -> Result<()> {
        self.metrics.write(step, values)
    }

    fn log_audio(&mut self, step: usize, clips: &[AudioClip]) -> Result<()> {
        for clip in clips {
            let path = self.sample_path(step, &clip.key);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            write_wav(&path, &clip.samples, self.sampling_rate)?;
        }
        Ok(())
    }

    fn save_model<M, O>(
        &mut self,
        model: &M,
        optimizer: Option<&O>,
        postfix: &str,
        state: &TrainingState,
    ) -> Result<PathBuf>
    where
        M: Checkpoint,
        O: Checkpoint,
    {
        let metadata = CheckpointMetadata::new(state);
        let path = self.checkpoints.save(model, optimizer, postfix, &metadata)?;
        self.log_info(&format!(" [*] model checkpoint saved: {}", path.display()))?;
        Ok(path)
    }

    fn interval_time(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time);
        self.last_time = now;
        elapsed
    }

    fn total_time(&self) -> Duration {
        self.init_time.elapsed()
    }
}

/// Format a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Write mono 16-bit PCM.
fn write_wav(path: &Path, samples: &[f32], sampling_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sampling_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| DdspError::Audio(format!("Failed to create {}: {}", path.display(), e)))?;

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(value)
            .map_err(|e| DdspError::Audio(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| DdspError::Audio(e.to_string()))?;

    Ok(())
}
