//! Supervised training loop for DDSP vocoders.
//!
//! Each step computes the loss and gradients through
//! [`TrainableVocoder::loss_and_gradients`], refuses to apply a NaN loss, and
//! then applies one optimizer update. Progress is logged every
//! `interval_log` steps; every `interval_val` steps a checkpoint is written
//! and the validation set is evaluated.

use std::path::PathBuf;

use ddsp_core::{
    AudioTensor, Batch, BatchSource, Cast, Checkpoint, DdspConfig, DdspError, Device,
    LossBreakdown, LossOptions, Optimizer, Result, TrainableVocoder, VocoderLoss,
};

use crate::evaluation::{evaluate, EvalConfig};
use crate::saver::format_elapsed;
use crate::{RunLogger, TrainingState};

/// Training loop configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingLoopConfig {
    /// Device batches are moved to.
    pub device: Device,
    /// Experiment directory, shown in progress lines.
    pub expdir: PathBuf,
    /// Sampling rate of the training audio.
    pub sampling_rate: u32,
    /// Number of passes over the training set.
    pub epochs: usize,
    /// Log progress every N steps.
    pub interval_log: usize,
    /// Checkpoint and validate every N steps.
    pub interval_val: usize,
    /// Steps during which the uv path is detached.
    pub detach_uv_step: usize,
    /// Tolerance passed to the uv loss.
    pub uv_tolerance: f64,
    /// Include optimizer state in checkpoints.
    pub save_opt: bool,
}

impl From<&DdspConfig> for TrainingLoopConfig {
    fn from(config: &DdspConfig) -> Self {
        Self {
            device: config.device,
            expdir: config.env.expdir.clone(),
            sampling_rate: config.data.sampling_rate,
            epochs: config.train.epochs,
            interval_log: config.train.interval_log,
            interval_val: config.train.interval_val,
            detach_uv_step: config.loss.detach_uv_step,
            uv_tolerance: config.loss.uv_tolerance,
            save_opt: config.train.save_opt,
        }
    }
}

impl TrainingLoopConfig {
    /// Settings for the validation pass.
    pub fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            device: self.device,
            sampling_rate: self.sampling_rate,
        }
    }
}

/// Training loop that connects model, loss, optimizer, loaders and logger.
pub struct TrainingLoop {
    config: TrainingLoopConfig,
    state: TrainingState,
}

impl TrainingLoop {
    /// Create a training loop starting at `initial_step`.
    pub fn new(config: TrainingLoopConfig, initial_step: usize) -> Self {
        Self {
            config,
            state: TrainingState::new(initial_step),
        }
    }

    /// Current training state.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Get current step.
    pub fn current_step(&self) -> usize {
        self.state.global_step
    }

    /// Configuration.
    pub fn config(&self) -> &TrainingLoopConfig {
        &self.config
    }

    /// Run a single optimization step and return the loss breakdown.
    ///
    /// The global step is incremented first. A NaN loss fails with
    /// [`DdspError::NanLoss`] before the optimizer is touched.
    pub fn train_step<M, O, L>(
        &mut self,
        model: &mut M,
        optimizer: &mut O,
        loss_fn: &L,
        batch: &Batch<M::Tensor>,
    ) -> Result<LossBreakdown>
    where
        M: TrainableVocoder,
        O: Optimizer<M>,
        L: VocoderLoss<M::Tensor>,
    {
        let step = self.state.advance();
        optimizer.zero_grad();

        let batch = batch.to_device(self.config.device, Cast::Preserve)?;

        let options = LossOptions::train(
            self.state.should_detach_uv(self.config.detach_uv_step),
            self.config.uv_tolerance,
        );
        let (output, gradients) = model.loss_and_gradients(&batch, loss_fn, &options)?;

        if output.loss.to_scalar()?.is_nan() {
            return Err(DdspError::NanLoss { step });
        }

        optimizer.step(model, gradients)?;

        Ok(output.breakdown)
    }

    /// Run the full training loop.
    pub fn run<M, O, L, D, V, S>(
        &mut self,
        model: &mut M,
        optimizer: &mut O,
        loss_fn: &L,
        train_loader: &mut D,
        valid_loader: &mut V,
        logger: &mut S,
    ) -> Result<()>
    where
        M: TrainableVocoder + Checkpoint,
        O: Optimizer<M> + Checkpoint,
        L: VocoderLoss<M::Tensor>,
        D: BatchSource<M::Tensor>,
        V: BatchSource<M::Tensor>,
        S: RunLogger,
    {
        logger.log_info("--- model size ---")?;
        logger.log_info(&format!("model: {}", model.num_parameters()))?;
        logger.log_info("======= start training =======")?;

        let num_batches = train_loader.num_batches();

        for epoch in 0..self.config.epochs {
            self.state.epoch = epoch;

            for (batch_idx, batch) in train_loader.batches().enumerate() {
                let batch = batch?;
                let breakdown = self.train_step(model, optimizer, loss_fn, &batch)?;

                if self.state.is_due(self.config.interval_log) {
                    let elapsed = logger.interval_time().as_secs_f64();
                    let batches_per_sec = if elapsed > 0.0 {
                        self.config.interval_log as f64 / elapsed
                    } else {
                        0.0
                    };

                    logger.log_info(&format!(
                        "epoch: {} | {:3}/{:3} | {} | batch/s: {:.2} | loss: {:.3} | rss: {:.3} | time: {} | step: {}",
                        epoch,
                        batch_idx,
                        num_batches,
                        self.config.expdir.display(),
                        batches_per_sec,
                        breakdown.require("train/loss")?,
                        breakdown.require("train/loss_rss")?,
                        format_elapsed(logger.total_time()),
                        self.state.global_step,
                    ))?;
                    logger.log_value(self.state.global_step, &breakdown)?;
                }

                if self.state.is_due(self.config.interval_val) {
                    self.validate(model, &*optimizer, loss_fn, valid_loader, logger)?;
                }
            }
        }

        tracing::info!(
            "Training complete: {} steps, best validation loss {:.4}",
            self.state.global_step,
            self.state.best_loss
        );

        Ok(())
    }

    /// Checkpoint, evaluate, and log the validation summary.
    fn validate<M, O, L, V, S>(
        &mut self,
        model: &mut M,
        optimizer: &O,
        loss_fn: &L,
        valid_loader: &mut V,
        logger: &mut S,
    ) -> Result<()>
    where
        M: TrainableVocoder + Checkpoint,
        O: Checkpoint,
        L: VocoderLoss<M::Tensor>,
        V: BatchSource<M::Tensor>,
        S: RunLogger,
    {
        let step = self.state.global_step;
        let optimizer = self.config.save_opt.then_some(optimizer);
        logger.save_model(&*model, optimizer, &step.to_string(), &self.state)?;

        let report = evaluate(
            model,
            loss_fn,
            valid_loader,
            logger,
            &self.config.eval_config(),
            step,
        )?;

        let loss = report.losses.require("validation/loss")?;
        logger.log_info(&format!(
            " --- <validation> --- \nloss: {:.3} | rss: {:.3}. ",
            loss,
            report.losses.require("validation/loss_rss")?,
        ))?;
        logger.log_value(step, &report.losses)?;

        self.state.record_validation(loss);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingLoopConfig {
        TrainingLoopConfig {
            device: Device::Cpu,
            expdir: PathBuf::from("exp/test"),
            sampling_rate: 16000,
            epochs: 1,
            interval_log: 10,
            interval_val: 100,
            detach_uv_step: 1000,
            uv_tolerance: 0.05,
            save_opt: false,
        }
    }

    #[test]
    fn test_training_loop_creation() {
        let training_loop = TrainingLoop::new(config(), 0);
        assert_eq!(training_loop.current_step(), 0);
        assert!(training_loop.state().best_loss.is_infinite());
    }

    #[test]
    fn test_resume_step() {
        let training_loop = TrainingLoop::new(config(), 4000);
        assert_eq!(training_loop.current_step(), 4000);
    }

    #[test]
    fn test_config_from_ddsp_config() {
        let ddsp = DdspConfig::from_yaml(
            "env:\n  expdir: exp/sins\nmodel:\n  type: Sins\nloss:\n  detach_uv_step: 500\ntrain:\n  save_opt: true\n",
        )
        .unwrap();
        let config = TrainingLoopConfig::from(&ddsp);
        assert_eq!(config.detach_uv_step, 500);
        assert!(config.save_opt);
        assert_eq!(config.expdir, PathBuf::from("exp/sins"));
        assert_eq!(config.eval_config().sampling_rate, 44100);
    }
}
