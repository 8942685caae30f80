//! Training batch definition.

use crate::{AudioTensor, Cast, DdspError, Device, Result};

/// A batch of vocoder training data.
///
/// Tensor fields share the same leading (batch) dimension. `names` holds the
/// sample identifiers and is never converted.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Sample identifiers.
    pub names: Vec<String>,
    /// Mel spectrogram `[batch, frames, n_mels]`.
    pub mel: T,
    /// Fundamental frequency contour `[batch, frames, 1]`.
    pub f0: T,
    /// Raw waveform `[batch, samples]`.
    pub audio: T,
    /// Voiced/unvoiced indicator `[batch, frames]`.
    pub uv: T,
}

impl<T: AudioTensor> Batch<T> {
    /// Create a batch, checking that every tensor shares the batch dimension.
    pub fn new(names: Vec<String>, mel: T, f0: T, audio: T, uv: T) -> Result<Self> {
        let batch_size = mel.batch_size();
        for tensor in [&f0, &audio, &uv] {
            if tensor.batch_size() != batch_size {
                let mut expected = tensor.shape();
                if let Some(first) = expected.first_mut() {
                    *first = batch_size;
                }
                return Err(DdspError::ShapeMismatch {
                    expected,
                    actual: tensor.shape(),
                });
            }
        }

        Ok(Self {
            names,
            mel,
            f0,
            audio,
            uv,
        })
    }

    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.mel.batch_size()
    }

    /// Identifier of the first sample, used to key logged audio.
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("unnamed")
    }

    /// Move every tensor field to `device`; identifiers are left untouched.
    pub fn to_device(&self, device: Device, cast: Cast) -> Result<Self> {
        Ok(Self {
            names: self.names.clone(),
            mel: self.mel.to_device(device, cast)?,
            f0: self.f0.to_device(device, cast)?,
            audio: self.audio.to_device(device, cast)?,
            uv: self.uv.to_device(device, cast)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dtype, HostTensor};

    fn zeros(shape: &[usize]) -> HostTensor {
        HostTensor::zeros(shape)
    }

    #[test]
    fn test_batch_new_checks_leading_dim() {
        let err = Batch::new(
            vec!["a".into()],
            zeros(&[2, 4, 8]),
            zeros(&[2, 4, 1]),
            zeros(&[1, 64]),
            zeros(&[2, 4]),
        )
        .unwrap_err();

        match err {
            DdspError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, vec![2, 64]);
                assert_eq!(actual, vec![1, 64]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_to_device_keeps_names_and_casts() {
        let batch = Batch::new(
            vec!["speaker1/utt".into(), "speaker2/utt".into()],
            zeros(&[2, 4, 8]),
            zeros(&[2, 4, 1]),
            zeros(&[2, 64]),
            zeros(&[2, 4]).with_dtype(Dtype::Bool),
        )
        .unwrap();

        let preserved = batch.to_device(Device::Gpu, Cast::Preserve).unwrap();
        assert_eq!(preserved.names, batch.names);
        assert_eq!(preserved.uv.dtype(), Dtype::Bool);
        assert_eq!(preserved.audio.device(), Device::Gpu);

        let cast = batch.to_device(Device::Gpu, Cast::Float).unwrap();
        assert_eq!(cast.uv.dtype(), Dtype::Float32);
        assert_eq!(cast.name(), "speaker1/utt");
    }
}
