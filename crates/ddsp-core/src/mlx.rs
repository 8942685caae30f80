//! [`AudioTensor`] for `mlx-rs` arrays.

use mlx_rs::{ops::indexing::IndexOp, Array};

use crate::{AudioTensor, Cast, DdspError, Device, Result};

fn backend(e: impl std::fmt::Display) -> DdspError {
    DdspError::Backend(e.to_string())
}

impl AudioTensor for Array {
    fn shape(&self) -> Vec<usize> {
        Array::shape(self).iter().map(|&d| d as usize).collect()
    }

    fn truncate(&self, len: usize) -> Result<Self> {
        let shape = AudioTensor::shape(self);
        let mismatch = || {
            let mut expected = shape.clone();
            if let Some(last) = expected.last_mut() {
                *last = len;
            }
            DdspError::ShapeMismatch {
                expected,
                actual: shape.clone(),
            }
        };

        if shape.last().map_or(true, |&n| len > n) {
            return Err(mismatch());
        }

        let end = len as i32;
        match shape.len() {
            1 => Ok(self.index(..end)),
            2 => Ok(self.index((.., ..end))),
            3 => Ok(self.index((.., .., ..end))),
            _ => Err(mismatch()),
        }
    }

    // Unified memory: arrays are visible to every device, only the dtype
    // policy applies.
    fn to_device(&self, _device: Device, cast: Cast) -> Result<Self> {
        match cast {
            Cast::Preserve => Ok(self.clone()),
            Cast::Float => self.as_dtype(mlx_rs::Dtype::Float32).map_err(backend),
        }
    }

    fn to_scalar(&self) -> Result<f64> {
        if self.size() != 1 {
            return Err(DdspError::ShapeMismatch {
                expected: vec![],
                actual: AudioTensor::shape(self),
            });
        }
        let value = self.as_dtype(mlx_rs::Dtype::Float32).map_err(backend)?;
        value.eval().map_err(backend)?;
        Ok(f64::from(value.item::<f32>()))
    }

    fn to_samples(&self) -> Result<Vec<f32>> {
        let row = if self.ndim() >= 2 {
            self.index(0)
        } else {
            self.clone()
        };
        let row = row
            .reshape(&[-1])
            .and_then(|r| r.as_dtype(mlx_rs::Dtype::Float32))
            .map_err(backend)?;
        row.eval().map_err(backend)?;
        Ok(row.as_slice::<f32>().to_vec())
    }
}
