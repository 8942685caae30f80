//! Collaborator trait definitions.
//!
//! The training and evaluation loops only talk to the model, loss function,
//! optimizer and data loader through these traits, so they can be driven by
//! any tensor backend.

use std::path::Path;

use crate::{Batch, Cast, Device, ForwardMode, LossBreakdown, Phase, Result};

/// Tensor operations the loops need.
///
/// Tensors are laid out with the batch on the first axis and time on the
/// last axis (`[batch, samples]` for audio).
pub trait AudioTensor: Clone {
    /// Shape of the tensor.
    fn shape(&self) -> Vec<usize>;

    /// Leading (batch) dimension.
    fn batch_size(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Length of the time (last) axis.
    fn num_samples(&self) -> usize {
        self.shape().last().copied().unwrap_or(0)
    }

    /// Keep the first `len` entries of the time axis.
    fn truncate(&self, len: usize) -> Result<Self>;

    /// Move to a compute device, applying the dtype policy.
    fn to_device(&self, device: Device, cast: Cast) -> Result<Self>;

    /// Value of a single-element tensor.
    fn to_scalar(&self) -> Result<f64>;

    /// Samples of the first batch item, flattened, as `f32`.
    fn to_samples(&self) -> Result<Vec<f32>>;
}

/// Output of one synthesis pass.
#[derive(Debug, Clone)]
pub struct Synthesis<T> {
    /// Synthesized waveform `[batch, samples]`.
    pub signal: T,
    /// Auxiliary model output, unused by the loops.
    pub aux: T,
    /// Harmonic component.
    pub harmonic: T,
    /// Noise component.
    pub noise: T,
}

/// Options forwarded to the loss function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossOptions {
    /// Phase used to prefix breakdown keys.
    pub phase: Phase,
    /// Stop gradient flow into the voiced/unvoiced mask path.
    pub detach_uv: bool,
    /// Tolerance for the voiced/unvoiced mask loss.
    pub uv_tolerance: Option<f64>,
}

impl LossOptions {
    /// Options used during training steps.
    #[must_use]
    pub fn train(detach_uv: bool, uv_tolerance: f64) -> Self {
        Self {
            phase: Phase::Train,
            detach_uv,
            uv_tolerance: Some(uv_tolerance),
        }
    }

    /// Options used during evaluation.
    #[must_use]
    pub fn validation() -> Self {
        Self {
            phase: Phase::Validation,
            detach_uv: false,
            uv_tolerance: None,
        }
    }
}

/// Loss value plus its named components.
#[derive(Debug, Clone)]
pub struct LossOutput<T> {
    /// Scalar loss tensor.
    pub loss: T,
    /// Named scalar components, keys prefixed by phase.
    pub breakdown: LossBreakdown,
}

/// Neural vocoder mapping (mel, f0) to audio.
pub trait Vocoder {
    /// Tensor type used by the model.
    type Tensor: AudioTensor;

    /// Run one synthesis pass.
    fn forward(
        &mut self,
        mel: &Self::Tensor,
        f0: &Self::Tensor,
        mode: ForwardMode,
    ) -> Result<Synthesis<Self::Tensor>>;

    /// Total number of parameters.
    fn num_parameters(&self) -> usize;
}

/// Vocoder that can produce parameter gradients for a batch.
pub trait TrainableVocoder: Vocoder {
    /// Gradient container consumed by the optimizer.
    type Gradients;

    /// Run the model in [`ForwardMode::Train`], compute the loss and return it
    /// together with gradients with respect to the parameters.
    ///
    /// Implementations must not modify parameters.
    fn loss_and_gradients<L>(
        &mut self,
        batch: &Batch<Self::Tensor>,
        loss_fn: &L,
        options: &LossOptions,
    ) -> Result<(LossOutput<Self::Tensor>, Self::Gradients)>
    where
        L: VocoderLoss<Self::Tensor>;
}

/// Loss function over synthesized and reference audio.
pub trait VocoderLoss<T> {
    /// Compute the loss and its breakdown.
    fn compute(
        &self,
        signal: &T,
        harmonic: &T,
        audio: &T,
        uv: &T,
        options: &LossOptions,
    ) -> Result<LossOutput<T>>;
}

/// Optimizer applying gradients to a model.
pub trait Optimizer<M: TrainableVocoder> {
    /// Clear accumulated gradients.
    fn zero_grad(&mut self);

    /// Apply one update step.
    fn step(&mut self, model: &mut M, gradients: M::Gradients) -> Result<()>;

    /// Override learning rate and weight decay.
    fn set_hyperparameters(&mut self, learning_rate: f64, weight_decay: f64);
}

/// State that can be persisted into and restored from a checkpoint directory.
pub trait Checkpoint {
    /// Write state into `dir`, which already exists.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Restore state from `dir`.
    fn load(&mut self, dir: &Path) -> Result<()>;
}

/// Source of batches, one pass per call to [`BatchSource::batches`].
pub trait BatchSource<T> {
    /// Number of batches per pass.
    fn num_batches(&self) -> usize;

    /// Iterate over one pass of batches.
    fn batches(&mut self) -> impl Iterator<Item = Result<Batch<T>>> + '_;
}
