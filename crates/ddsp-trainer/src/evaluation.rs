//! Validation pass with real-time-factor measurement.

use std::time::{Duration, Instant};

use ddsp_core::{
    AudioTensor, BatchSource, Cast, Device, ForwardMode, LossBreakdown, LossOptions, Result,
    Vocoder, VocoderLoss,
};

use crate::{AudioClip, RunLogger};

/// Settings for [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalConfig {
    /// Device batches are moved to.
    pub device: Device,
    /// Sampling rate of the reference audio, for RTF.
    pub sampling_rate: u32,
}

/// Result of a validation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalReport {
    /// Loss breakdown averaged over the loader's batch count.
    pub losses: LossBreakdown,
    /// Real-time factor of each batch, in loader order.
    pub rtf: Vec<f64>,
}

impl EvalReport {
    /// Mean real-time factor, `None` when no batch was evaluated.
    pub fn mean_rtf(&self) -> Option<f64> {
        if self.rtf.is_empty() {
            None
        } else {
            Some(self.rtf.iter().sum::<f64>() / self.rtf.len() as f64)
        }
    }
}

/// Synthesis time divided by the duration of the synthesized audio.
pub fn real_time_factor(elapsed: Duration, num_samples: usize, sampling_rate: u32) -> f64 {
    let audio_secs = num_samples as f64 / f64::from(sampling_rate);
    elapsed.as_secs_f64() / audio_secs
}

/// Truncate both tensors to the shorter time axis.
pub fn crop_to_shortest<T: AudioTensor>(signal: &T, audio: &T) -> Result<(T, T)> {
    let len = signal.num_samples().min(audio.num_samples());
    Ok((signal.truncate(len)?, audio.truncate(len)?))
}

/// Add `breakdown / num_batches` into `mean`, keyed by metric name.
pub fn accumulate_mean(mean: &mut LossBreakdown, breakdown: &LossBreakdown, num_batches: usize) {
    let scale = num_batches.max(1) as f64;
    for (key, value) in breakdown.iter() {
        match mean.get_mut(key) {
            Some(total) => *total += value / scale,
            None => mean.insert(key, value / scale),
        }
    }
}

/// Run the model over `loader` in inference mode and average the loss.
///
/// One reference/prediction pair per batch is logged under
/// `<name>/gt.wav` and `<name>/pred.wav` at `step`. NaN losses are not
/// checked here.
pub fn evaluate<M, L, D, S>(
    model: &mut M,
    loss_fn: &L,
    loader: &mut D,
    logger: &mut S,
    config: &EvalConfig,
    step: usize,
) -> Result<EvalReport>
where
    M: Vocoder,
    L: VocoderLoss<M::Tensor>,
    D: BatchSource<M::Tensor>,
    S: RunLogger,
{
    tracing::info!(" [*] testing...");

    let num_batches = loader.num_batches();
    let options = LossOptions::validation();
    let mut report = EvalReport::default();

    for (bidx, batch) in loader.batches().enumerate() {
        let batch = batch?;
        let name = batch.name().to_string();
        tracing::info!("{}/{} - {}", bidx, num_batches, name);

        let batch = batch.to_device(config.device, Cast::Float)?;

        let start = Instant::now();
        let synthesis = model.forward(&batch.mel, &batch.f0, ForwardMode::Infer)?;
        let elapsed = start.elapsed();

        let (signal, audio) = crop_to_shortest(&synthesis.signal, &batch.audio)?;

        let rtf = real_time_factor(elapsed, audio.num_samples(), config.sampling_rate);
        tracing::info!(
            "RTF: {}  | {} / {}",
            rtf,
            elapsed.as_secs_f64(),
            audio.num_samples() as f64 / f64::from(config.sampling_rate)
        );
        report.rtf.push(rtf);

        let output = loss_fn.compute(&signal, &synthesis.harmonic, &audio, &batch.uv, &options)?;
        accumulate_mean(&mut report.losses, &output.breakdown, num_batches);

        logger.log_audio(
            step,
            &[
                AudioClip::new(format!("{}/gt.wav", name), audio.to_samples()?),
                AudioClip::new(format!("{}/pred.wav", name), signal.to_samples()?),
            ],
        )?;
    }

    if let Some(loss) = report.losses.get("validation/loss") {
        tracing::info!(" [test_loss] test_loss: {}", loss);
    }
    if let Some(rss) = report.losses.get("validation/loss_rss") {
        tracing::info!(" [test_loss] test_loss_rss: {}", rss);
    }
    if let Some(rtf) = report.mean_rtf() {
        tracing::info!(" Real Time Factor {}", rtf);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddsp_core::HostTensor;

    #[test]
    fn test_rtf() {
        let rtf = real_time_factor(Duration::from_millis(500), 88200, 44100);
        assert!((rtf - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_crop_to_shortest() {
        let signal = HostTensor::zeros(&[1, 1030]);
        let audio = HostTensor::zeros(&[1, 1024]);
        let (signal, audio) = crop_to_shortest(&signal, &audio).unwrap();
        assert_eq!(signal.num_samples(), 1024);
        assert_eq!(audio.num_samples(), 1024);
    }

    #[test]
    fn test_online_mean() {
        let mut mean = LossBreakdown::new();
        for value in [1.0, 2.0, 3.0] {
            let breakdown: LossBreakdown = [("validation/loss", value)].into_iter().collect();
            accumulate_mean(&mut mean, &breakdown, 3);
        }
        assert!((mean.require("validation/loss").unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_rtf() {
        let report = EvalReport {
            losses: LossBreakdown::new(),
            rtf: vec![0.2, 0.4],
        };
        assert!((report.mean_rtf().unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(EvalReport::default().mean_rtf(), None);
    }
}
