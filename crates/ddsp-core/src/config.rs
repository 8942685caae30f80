//! Configuration types for the DDSP trainer.

use crate::{DdspError, Device, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Full experiment configuration, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdspConfig {
    /// Compute device.
    #[serde(default)]
    pub device: Device,

    /// Experiment environment.
    pub env: EnvConfig,

    /// Audio and dataset settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Model selection and hyperparameters.
    pub model: ModelSpec,

    /// Loss settings.
    #[serde(default)]
    pub loss: LossConfig,

    /// Optimization schedule.
    #[serde(default)]
    pub train: TrainConfig,
}

/// Experiment environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Experiment directory; checkpoints, logs and samples are written here.
    pub expdir: PathBuf,

    /// GPU index used when `device` is a GPU.
    #[serde(default)]
    pub gpu_id: usize,
}

/// Audio and dataset settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Audio sampling rate in Hz.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,

    /// Hop size in samples between mel frames.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Number of mel bins.
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,

    /// Training segment duration in seconds.
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Training set location.
    #[serde(default)]
    pub train_path: Option<PathBuf>,

    /// Validation set location.
    #[serde(default)]
    pub valid_path: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            block_size: default_block_size(),
            n_mels: default_n_mels(),
            duration: default_duration(),
            train_path: None,
            valid_path: None,
        }
    }
}

/// Recognized model kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Additive sinusoidal harmonic synthesis plus filtered noise.
    Sins,
    /// Combtooth-subtractive harmonic synthesis plus filtered noise.
    CombSub,
}

impl ModelKind {
    /// Every recognized kind.
    pub const ALL: [ModelKind; 2] = [ModelKind::Sins, ModelKind::CombSub];

    /// Name used in configuration files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sins => "Sins",
            Self::CombSub => "CombSub",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = DdspError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DdspError::UnknownModel(s.to_string()))
    }
}

/// Model selection, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelSpec {
    /// Sinusoidal harmonic model.
    Sins(SinsConfig),
    /// Combtooth-subtractive model.
    CombSub(CombSubConfig),
}

impl ModelSpec {
    /// Kind of model selected.
    #[must_use]
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Sins(_) => ModelKind::Sins,
            Self::CombSub(_) => ModelKind::CombSub,
        }
    }

    fn validate(&self) -> Result<()> {
        let (win_length, n_mag_noise, harmonic_dim, harmonic_name) = match self {
            Self::Sins(c) => (c.win_length, c.n_mag_noise, c.n_harmonics, "n_harmonics"),
            Self::CombSub(c) => (c.win_length, c.n_mag_noise, c.n_mag_harmonic, "n_mag_harmonic"),
        };
        require_positive("model.win_length", win_length)?;
        require_positive("model.n_mag_noise", n_mag_noise)?;
        require_positive(&format!("model.{harmonic_name}"), harmonic_dim)
    }
}

/// Hyperparameters of the sinusoidal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinsConfig {
    /// Window length of the noise filter.
    #[serde(default = "default_win_length")]
    pub win_length: usize,

    /// Smooth predicted amplitudes with a mean filter.
    #[serde(default = "default_true")]
    pub use_mean_filter: bool,

    /// Number of harmonics.
    #[serde(default = "default_n_harmonics")]
    pub n_harmonics: usize,

    /// Number of noise filter magnitudes.
    #[serde(default = "default_n_mag_noise")]
    pub n_mag_noise: usize,
}

impl Default for SinsConfig {
    fn default() -> Self {
        Self {
            win_length: default_win_length(),
            use_mean_filter: true,
            n_harmonics: default_n_harmonics(),
            n_mag_noise: default_n_mag_noise(),
        }
    }
}

/// Hyperparameters of the combtooth-subtractive model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombSubConfig {
    /// Window length of the harmonic and noise filters.
    #[serde(default = "default_win_length")]
    pub win_length: usize,

    /// Smooth predicted magnitudes with a mean filter.
    #[serde(default = "default_true")]
    pub use_mean_filter: bool,

    /// Number of harmonic filter magnitudes.
    #[serde(default = "default_n_mag_harmonic")]
    pub n_mag_harmonic: usize,

    /// Number of noise filter magnitudes.
    #[serde(default = "default_n_mag_noise")]
    pub n_mag_noise: usize,
}

impl Default for CombSubConfig {
    fn default() -> Self {
        Self {
            win_length: default_win_length(),
            use_mean_filter: true,
            n_mag_harmonic: default_n_mag_harmonic(),
            n_mag_noise: default_n_mag_noise(),
        }
    }
}

/// Loss settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossConfig {
    /// Smallest FFT size of the multi-resolution STFT loss.
    #[serde(default = "default_fft_min")]
    pub fft_min: usize,

    /// Largest FFT size of the multi-resolution STFT loss.
    #[serde(default = "default_fft_max")]
    pub fft_max: usize,

    /// Number of STFT scales.
    #[serde(default = "default_n_scale")]
    pub n_scale: usize,

    /// Weight of the voiced/unvoiced loss.
    #[serde(default = "default_lambda_uv")]
    pub lambda_uv: f64,

    /// Steps during which gradients into the uv path are detached.
    #[serde(default = "default_detach_uv_step")]
    pub detach_uv_step: usize,

    /// Tolerance of the uv loss.
    #[serde(default = "default_uv_tolerance")]
    pub uv_tolerance: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            fft_min: default_fft_min(),
            fft_max: default_fft_max(),
            n_scale: default_n_scale(),
            lambda_uv: default_lambda_uv(),
            detach_uv_step: default_detach_uv_step(),
            uv_tolerance: default_uv_tolerance(),
        }
    }
}

/// Optimization schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Learning rate.
    #[serde(default = "default_lr")]
    pub lr: f64,

    /// Weight decay.
    #[serde(default)]
    pub weight_decay: f64,

    /// Number of epochs.
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Log progress every N steps.
    #[serde(default = "default_interval_log")]
    pub interval_log: usize,

    /// Checkpoint and validate every N steps.
    #[serde(default = "default_interval_val")]
    pub interval_val: usize,

    /// Include optimizer state in checkpoints.
    #[serde(default)]
    pub save_opt: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: 0.0,
            epochs: default_epochs(),
            interval_log: default_interval_log(),
            interval_val: default_interval_val(),
            save_opt: false,
        }
    }
}

impl DdspConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DdspError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML configuration.
    ///
    /// The model type is checked against [`ModelKind::ALL`] before the rest of
    /// the document is deserialized.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;

        if let Some(kind) = raw.get("model").and_then(|model| model.get("type")) {
            let name = match kind.as_str() {
                Some(name) => name.to_string(),
                None => format!("{kind:?}"),
            };
            name.parse::<ModelKind>()?;
        }

        let config: Self = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.env.expdir.as_os_str().is_empty() {
            return Err(DdspError::Config("env.expdir must not be empty".into()));
        }

        require_positive("data.sampling_rate", self.data.sampling_rate as usize)?;
        require_positive("data.block_size", self.data.block_size)?;
        require_positive("data.n_mels", self.data.n_mels)?;

        self.model.validate()?;

        require_positive("loss.n_scale", self.loss.n_scale)?;
        if self.loss.fft_min > self.loss.fft_max {
            return Err(DdspError::Config(format!(
                "loss.fft_min ({}) must not exceed loss.fft_max ({})",
                self.loss.fft_min, self.loss.fft_max
            )));
        }
        if !(self.loss.uv_tolerance >= 0.0) {
            return Err(DdspError::Config(format!(
                "loss.uv_tolerance must be >= 0, got {}",
                self.loss.uv_tolerance
            )));
        }

        require_positive("train.batch_size", self.train.batch_size)?;
        require_positive("train.interval_log", self.train.interval_log)?;
        require_positive("train.interval_val", self.train.interval_val)?;
        if !(self.train.lr > 0.0) {
            return Err(DdspError::Config(format!(
                "train.lr must be > 0, got {}",
                self.train.lr
            )));
        }
        if !(self.train.weight_decay >= 0.0) {
            return Err(DdspError::Config(format!(
                "train.weight_decay must be >= 0, got {}",
                self.train.weight_decay
            )));
        }

        Ok(())
    }
}

fn require_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(DdspError::Config(format!("{name} must be > 0")));
    }
    Ok(())
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_sampling_rate() -> u32 {
    44100
}
fn default_block_size() -> usize {
    512
}
fn default_n_mels() -> usize {
    128
}
fn default_duration() -> f64 {
    2.0
}
fn default_win_length() -> usize {
    2048
}
fn default_n_harmonics() -> usize {
    128
}
fn default_n_mag_harmonic() -> usize {
    512
}
fn default_n_mag_noise() -> usize {
    256
}
fn default_fft_min() -> usize {
    256
}
fn default_fft_max() -> usize {
    2048
}
fn default_n_scale() -> usize {
    4
}
fn default_lambda_uv() -> f64 {
    1.0
}
fn default_detach_uv_step() -> usize {
    2000
}
fn default_uv_tolerance() -> f64 {
    0.05
}
fn default_batch_size() -> usize {
    24
}
fn default_lr() -> f64 {
    5e-4
}
fn default_epochs() -> usize {
    100_000
}
fn default_interval_log() -> usize {
    10
}
fn default_interval_val() -> usize {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBSUB_YAML: &str = r#"
device: cuda
env:
  expdir: exp/combsub-test
  gpu_id: 0
data:
  sampling_rate: 44100
  block_size: 512
  n_mels: 128
model:
  type: CombSub
  win_length: 2048
  use_mean_filter: true
  n_mag_harmonic: 512
  n_mag_noise: 256
loss:
  fft_min: 256
  fft_max: 2048
  n_scale: 4
  lambda_uv: 1.0
  detach_uv_step: 2000
  uv_tolerance: 0.05
train:
  batch_size: 24
  lr: 0.0005
  weight_decay: 0
  epochs: 100000
  interval_log: 10
  interval_val: 2000
  save_opt: false
"#;

    #[test]
    fn test_load_combsub() {
        let config = DdspConfig::from_yaml(COMBSUB_YAML).unwrap();
        assert_eq!(config.device, Device::Gpu);
        assert_eq!(config.model.kind(), ModelKind::CombSub);
        assert_eq!(config.env.expdir, PathBuf::from("exp/combsub-test"));
        assert_eq!(config.loss.detach_uv_step, 2000);
        assert_eq!(config.train.interval_val, 2000);
        assert!(!config.train.save_opt);
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = DdspConfig::from_yaml(
            "env:\n  expdir: exp/sins\nmodel:\n  type: Sins\n",
        )
        .unwrap();
        assert_eq!(config.data, DataConfig::default());
        assert_eq!(config.model, ModelSpec::Sins(SinsConfig::default()));
        assert_eq!(config.train.interval_log, 10);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = DdspConfig::from_yaml("env:\n  expdir: exp\nmodel:\n  type: Wavenet\n")
            .unwrap_err();
        match err {
            DdspError::UnknownModel(name) => assert_eq!(name, "Wavenet"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = "env:\n  expdir: exp\nmodel:\n  type: Sins\ntrain:\n  interval_val: 0\n";
        assert!(matches!(
            DdspConfig::from_yaml(yaml),
            Err(DdspError::Config(_))
        ));
    }

    #[test]
    fn test_fft_range_checked() {
        let yaml = "env:\n  expdir: exp\nmodel:\n  type: Sins\nloss:\n  fft_min: 4096\n";
        assert!(matches!(
            DdspConfig::from_yaml(yaml),
            Err(DdspError::Config(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = DdspConfig::from_yaml(COMBSUB_YAML).unwrap();
        let again = DdspConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("Sins".parse::<ModelKind>().unwrap(), ModelKind::Sins);
        assert!("sins".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::CombSub.to_string(), "CombSub");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("combsub.yaml");
        std::fs::write(&path, COMBSUB_YAML).unwrap();
        assert!(DdspConfig::load(&path).is_ok());
        assert!(matches!(
            DdspConfig::load(dir.path().join("missing.yaml")),
            Err(DdspError::Config(_))
        ));
    }
}
