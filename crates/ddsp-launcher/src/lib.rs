//! DDSP vocoder training launcher.
//!
//! Parses the command line, loads the experiment configuration, builds the
//! model through the configured [`ModelSpec`](ddsp_core::ModelSpec), restores
//! the latest checkpoint and runs the training loop. The concrete model,
//! loss and data loaders come from a [`Backend`] supplied by the binary:
//!
//! ```ignore
//! use clap::Parser;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cli = ddsp_launcher::Cli::parse();
//!     ddsp_launcher::run(&cli, &MyBackend::default())
//! }
//! ```

#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ddsp_core::{
    BatchSource, Checkpoint, DataConfig, DdspConfig, Device, LossConfig, Optimizer, Result,
    TrainConfig, TrainableVocoder, Vocoder, VocoderFactory, VocoderLoss,
};
use ddsp_trainer::{Saver, TrainingLoop, TrainingLoopConfig};

/// Command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "ddsp")]
#[command(author, version, about = "Train a DDSP neural vocoder", long_about = None)]
pub struct Cli {
    /// Path to the experiment configuration (YAML).
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Concrete collaborators for a training run.
pub trait Backend {
    /// Model type.
    type Vocoder: TrainableVocoder + Checkpoint;
    /// Builds [`Self::Vocoder`] for each model kind.
    type Factory: VocoderFactory<Model = Self::Vocoder>;
    /// Optimizer type.
    type Optimizer: Optimizer<Self::Vocoder> + Checkpoint;
    /// Loss type.
    type Loss: VocoderLoss<<Self::Vocoder as Vocoder>::Tensor>;
    /// Data loader type.
    type Loader: BatchSource<<Self::Vocoder as Vocoder>::Tensor>;

    /// Model factory.
    fn factory(&self) -> &Self::Factory;

    /// Build the optimizer.
    fn optimizer(&self, train: &TrainConfig) -> Result<Self::Optimizer>;

    /// Build the loss function.
    fn loss(&self, loss: &LossConfig, data: &DataConfig) -> Result<Self::Loss>;

    /// Build the training and validation loaders.
    fn loaders(&self, config: &DdspConfig) -> Result<(Self::Loader, Self::Loader)>;

    /// Select the compute device before training starts.
    fn select_device(&self, _device: Device, _gpu_id: usize) -> Result<()> {
        Ok(())
    }
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to INFO. Does nothing if a subscriber is
/// already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Load the configuration and run training to completion.
pub fn run<B: Backend>(cli: &Cli, backend: &B) -> anyhow::Result<()> {
    init_tracing();

    let config = DdspConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    tracing::info!(" > config: {}", cli.config.display());
    tracing::info!(" >    exp: {}", config.env.expdir.display());

    let mut model = config.model.build(&config.data, backend.factory())?;
    let mut optimizer = backend.optimizer(&config.train)?;

    let mut saver = Saver::from_config(&config)?;
    let initial_step = saver
        .checkpoints()
        .restore(&mut model, Some(&mut optimizer))?
        .map_or(0, |metadata| metadata.step);
    if initial_step > 0 {
        tracing::info!("Resuming from step {}", initial_step);
    }
    optimizer.set_hyperparameters(config.train.lr, config.train.weight_decay);

    let loss = backend.loss(&config.loss, &config.data)?;
    backend.select_device(config.device, config.env.gpu_id)?;

    let (mut train_loader, mut valid_loader) = backend.loaders(&config)?;

    let mut training_loop = TrainingLoop::new(TrainingLoopConfig::from(&config), initial_step);
    training_loop.run(
        &mut model,
        &mut optimizer,
        &loss,
        &mut train_loader,
        &mut valid_loader,
        &mut saver,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_config() {
        let cli = Cli::try_parse_from(["ddsp", "-c", "configs/combsub.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("configs/combsub.yaml"));

        let cli = Cli::try_parse_from(["ddsp", "--config", "a.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("a.yaml"));

        assert!(Cli::try_parse_from(["ddsp"]).is_err());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
