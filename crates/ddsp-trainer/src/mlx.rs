//! MLX backend glue: autodiff step, AdamW and safetensors persistence for
//! `mlx-rs` modules.
//!
//! The [`AudioTensor`](ddsp_core::AudioTensor) impl for [`Array`] lives in
//! `ddsp-core` behind its own `mlx` feature.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use ddsp_core::{
    Batch, DdspError, ForwardMode, LossBreakdown, LossOptions, LossOutput, Optimizer, Result,
    TrainableVocoder, Vocoder, VocoderLoss,
};
use mlx_rs::{
    array,
    builder::Builder,
    error::Exception,
    module::{FlattenedModuleParam, ModuleParameters},
    nn,
    optimizers::{AdamW, AdamWBuilder, Optimizer as _},
    Array,
};

const WEIGHTS_FILE: &str = "weights.safetensors";
const OPTIMIZER_FILE: &str = "optimizer.safetensors";

fn backend(e: impl std::fmt::Display) -> DdspError {
    DdspError::Backend(e.to_string())
}

/// Forward in [`ForwardMode::Train`], compute the loss and differentiate it
/// with respect to the module parameters.
///
/// MLX models implement [`TrainableVocoder::loss_and_gradients`] by calling
/// this. Parameters are left untouched.
pub fn loss_and_gradients<M, L>(
    model: &mut M,
    batch: &Batch<Array>,
    loss_fn: &L,
    options: &LossOptions,
) -> Result<(LossOutput<Array>, FlattenedModuleParam)>
where
    M: Vocoder<Tensor = Array> + ModuleParameters,
    L: VocoderLoss<Array>,
{
    let mut breakdown: Option<LossBreakdown> = None;

    let (loss, grads) = {
        let loss_closure =
            |model: &mut M, batch: &Batch<Array>| -> std::result::Result<Array, Exception> {
                let synthesis = model
                    .forward(&batch.mel, &batch.f0, ForwardMode::Train)
                    .map_err(|e| Exception::custom(e.to_string()))?;
                let output = loss_fn
                    .compute(
                        &synthesis.signal,
                        &synthesis.harmonic,
                        &batch.audio,
                        &batch.uv,
                        options,
                    )
                    .map_err(|e| Exception::custom(e.to_string()))?;
                breakdown = Some(output.breakdown);
                Ok(output.loss)
            };

        let mut loss_and_grad_fn = nn::value_and_grad(loss_closure);
        loss_and_grad_fn(model, batch).map_err(backend)?
    };

    let breakdown = breakdown.unwrap_or_default();
    Ok((LossOutput { loss, breakdown }, grads))
}

/// Save every module parameter to `<dir>/weights.safetensors`.
pub fn save_module<M: ModuleParameters>(module: &M, dir: &Path) -> Result<()> {
    let params: HashMap<Rc<str>, Array> = module
        .parameters()
        .flatten()
        .into_iter()
        .map(|(k, v)| (k, v.clone()))
        .collect();
    Array::save_safetensors(params, None, dir.join(WEIGHTS_FILE)).map_err(|e| {
        DdspError::Checkpoint(format!("Failed to save weights: {}", e))
    })
}

/// Load module parameters from `<dir>/weights.safetensors`.
pub fn load_module<M: ModuleParameters>(module: &mut M, dir: &Path) -> Result<()> {
    let params = Array::load_safetensors(dir.join(WEIGHTS_FILE))
        .map_err(|e| DdspError::Checkpoint(format!("Failed to load weights: {}", e)))?;
    let params: HashMap<Rc<str>, Array> = params
        .into_iter()
        .map(|(k, v)| (Rc::from(k), v))
        .collect();
    module.update_flattened(params);
    Ok(())
}

/// AdamW over `mlx-rs` modules.
///
/// Gradients are produced functionally by [`loss_and_gradients`], so there
/// is nothing to clear in [`Optimizer::zero_grad`].
pub struct MlxAdamW {
    inner: AdamW,
}

impl MlxAdamW {
    /// Create an optimizer.
    pub fn new(learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let inner = AdamWBuilder::new(learning_rate as f32)
            .weight_decay(weight_decay as f32)
            .build()
            .map_err(|_| DdspError::Backend("Failed to build AdamW optimizer".into()))?;
        Ok(Self { inner })
    }
}

impl<M> Optimizer<M> for MlxAdamW
where
    M: TrainableVocoder<Tensor = Array, Gradients = FlattenedModuleParam> + ModuleParameters,
{
    fn zero_grad(&mut self) {}

    fn step(&mut self, model: &mut M, gradients: FlattenedModuleParam) -> Result<()> {
        self.inner.update(model, gradients).map_err(backend)
    }

    fn set_hyperparameters(&mut self, learning_rate: f64, weight_decay: f64) {
        self.inner.lr = array!(learning_rate as f32);
        self.inner.weight_decay = array!(weight_decay as f32);
    }
}

impl ddsp_core::Checkpoint for MlxAdamW {
    fn save(&self, dir: &Path) -> Result<()> {
        let mut moments: HashMap<Rc<str>, Array> = HashMap::new();
        for (key, (m, v)) in self.inner.state.iter() {
            moments.insert(Rc::from(format!("{}.m", key)), m.clone());
            moments.insert(Rc::from(format!("{}.v", key)), v.clone());
        }
        Array::save_safetensors(moments, None, dir.join(OPTIMIZER_FILE)).map_err(|e| {
            DdspError::Checkpoint(format!("Failed to save optimizer state: {}", e))
        })
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        let moments = Array::load_safetensors(dir.join(OPTIMIZER_FILE)).map_err(|e| {
            DdspError::Checkpoint(format!("Failed to load optimizer state: {}", e))
        })?;

        let mut first: HashMap<String, Array> = HashMap::new();
        let mut second: HashMap<String, Array> = HashMap::new();
        for (name, value) in moments {
            match name.rsplit_once('.') {
                Some((key, "m")) => {
                    first.insert(key.to_string(), value);
                }
                Some((key, "v")) => {
                    second.insert(key.to_string(), value);
                }
                _ => tracing::warn!("Ignoring unexpected optimizer entry {}", name),
            }
        }

        self.inner.state.clear();
        for (key, m) in first {
            let Some(v) = second.remove(&key) else {
                return Err(DdspError::Checkpoint(format!(
                    "Optimizer state for {} is missing its second moment",
                    key
                )));
            };
            self.inner.state.insert(Rc::from(key), (m, v));
        }
        Ok(())
    }
}
