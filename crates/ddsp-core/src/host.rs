//! Dense host-memory tensor.
//!
//! Values are stored as `f32` regardless of the logical dtype, which is kept
//! so dtype policies can be observed. Useful for CPU-side batch assembly and
//! for driving the loops in tests.

use crate::{AudioTensor, Cast, DdspError, Device, Dtype, Result};

/// Row-major `f32` tensor living in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    dtype: Dtype,
    device: Device,
}

impl HostTensor {
    /// Create a tensor from data and shape.
    pub fn new(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(DdspError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype: Dtype::Float32,
            device: Device::Cpu,
        })
    }

    /// Zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Tensor filled with `value`.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        Self {
            data: vec![value; shape.iter().product()],
            shape: shape.to_vec(),
            dtype: Dtype::Float32,
            device: Device::Cpu,
        }
    }

    /// Zero-dimensional tensor holding one value.
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self::full(&[], value)
    }

    /// Set the logical dtype.
    #[must_use]
    pub fn with_dtype(mut self, dtype: Dtype) -> Self {
        self.dtype = dtype;
        self
    }

    /// Logical dtype.
    #[must_use]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Device the tensor was last moved to.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Raw values, row-major.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn row_len(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }
}

impl AudioTensor for HostTensor {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn truncate(&self, len: usize) -> Result<Self> {
        let row_len = self.row_len();
        if self.shape.is_empty() || len > row_len {
            let mut expected = self.shape.clone();
            if let Some(last) = expected.last_mut() {
                *last = len;
            }
            return Err(DdspError::ShapeMismatch {
                expected,
                actual: self.shape.clone(),
            });
        }

        let data = if row_len == 0 {
            Vec::new()
        } else {
            self.data
                .chunks(row_len)
                .flat_map(|row| row[..len].iter().copied())
                .collect()
        };
        let mut shape = self.shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = len;
        }

        Ok(Self {
            data,
            shape,
            dtype: self.dtype,
            device: self.device,
        })
    }

    fn to_device(&self, device: Device, cast: Cast) -> Result<Self> {
        let dtype = match cast {
            Cast::Preserve => self.dtype,
            Cast::Float => Dtype::Float32,
        };
        Ok(Self {
            data: self.data.clone(),
            shape: self.shape.clone(),
            dtype,
            device,
        })
    }

    fn to_scalar(&self) -> Result<f64> {
        match self.data.as_slice() {
            [value] => Ok(f64::from(*value)),
            _ => Err(DdspError::ShapeMismatch {
                expected: vec![],
                actual: self.shape.clone(),
            }),
        }
    }

    fn to_samples(&self) -> Result<Vec<f32>> {
        let batch = self.batch_size().max(1);
        let per_item = self.data.len() / batch;
        Ok(self.data[..per_item].to_vec())
    }
}
