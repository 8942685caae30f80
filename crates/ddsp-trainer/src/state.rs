//! Mutable progress of a training run.

use serde::{Deserialize, Serialize};

/// Progress counters owned by the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Number of optimizer steps taken, including resumed ones.
    pub global_step: usize,
    /// Current epoch.
    pub epoch: usize,
    /// Lowest validation loss seen so far.
    pub best_loss: f64,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TrainingState {
    /// State starting at `initial_step`, e.g. the step of a restored checkpoint.
    #[must_use]
    pub fn new(initial_step: usize) -> Self {
        Self {
            global_step: initial_step,
            epoch: 0,
            best_loss: f64::INFINITY,
        }
    }

    /// Increment the global step and return the new value.
    pub fn advance(&mut self) -> usize {
        self.global_step += 1;
        self.global_step
    }

    /// Whether the uv path is still detached at the current step.
    #[must_use]
    pub fn should_detach_uv(&self, detach_uv_step: usize) -> bool {
        self.global_step < detach_uv_step
    }

    /// Whether the current step lands on `interval`.
    #[must_use]
    pub fn is_due(&self, interval: usize) -> bool {
        interval > 0 && self.global_step % interval == 0
    }

    /// Record a validation loss; returns `true` when it is a new best.
    ///
    /// NaN never becomes the best loss.
    pub fn record_validation(&mut self, loss: f64) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            true
        } else {
            false
        }
    }
}
