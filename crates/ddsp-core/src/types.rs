//! Common type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DdspError, Result};

/// Data type for tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 32-bit floating point.
    #[default]
    Float32,
    /// 16-bit floating point.
    Float16,
    /// Brain floating point (16-bit).
    BFloat16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Boolean.
    Bool,
}

/// Compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU computation.
    Cpu,
    /// GPU computation.
    #[default]
    #[serde(alias = "cuda", alias = "mps", alias = "metal")]
    Gpu,
}

/// How the model is being invoked.
///
/// Passed explicitly on every forward call instead of living as a mutable flag
/// on the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    /// Gradient tracking and training-only stochastic behavior enabled.
    Train,
    /// Inference: no gradients, deterministic.
    Infer,
}

impl ForwardMode {
    /// Whether this is an inference call.
    #[must_use]
    pub const fn is_inference(&self) -> bool {
        matches!(self, Self::Infer)
    }
}

/// Loop phase, used to prefix loss breakdown keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Optimization steps.
    Train,
    /// Held-out evaluation.
    Validation,
}

impl Phase {
    /// Key prefix for loss breakdown entries of this phase.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Train => "train/",
            Self::Validation => "validation/",
        }
    }

    /// Prefixed metric key, e.g. `validation/loss`.
    #[must_use]
    pub fn key(&self, metric: &str) -> String {
        format!("{}{}", self.prefix(), metric)
    }
}

/// Dtype policy applied when moving tensors onto the compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cast {
    /// Keep the original dtype.
    #[default]
    Preserve,
    /// Cast to 32-bit floating point.
    Float,
}

/// Scalar loss components keyed by phase-prefixed metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LossBreakdown(BTreeMap<String, f64>);

impl LossBreakdown {
    /// Create an empty breakdown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a metric.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Get a metric value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Get a metric value, failing if it is absent.
    pub fn require(&self, key: &str) -> Result<f64> {
        self.get(key)
            .ok_or_else(|| DdspError::MissingMetric(key.to_string()))
    }

    /// Mutable access to a metric value.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut f64> {
        self.0.get_mut(key)
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the breakdown is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for LossBreakdown {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
