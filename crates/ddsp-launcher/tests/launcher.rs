//! Launcher integration tests with a host-memory backend.

use std::cell::RefCell;
use std::path::Path;

use ddsp_launcher::{run, Backend, Cli};
use ddsp_core::{
    AudioTensor, Batch, BatchSource, Checkpoint, CombSubConfig, DataConfig, DdspConfig,
    DdspError, Device, ForwardMode, HostTensor, LossBreakdown, LossConfig, LossOptions,
    LossOutput, ModelKind, Optimizer, Result, SinsConfig, Synthesis, TrainConfig,
    TrainableVocoder, Vocoder, VocoderFactory, VocoderLoss,
};
use tempfile::TempDir;

struct ToyVocoder {
    kind: ModelKind,
    bias: f32,
}

impl Vocoder for ToyVocoder {
    type Tensor = HostTensor;

    fn forward(
        &mut self,
        mel: &HostTensor,
        _f0: &HostTensor,
        _mode: ForwardMode,
    ) -> Result<Synthesis<HostTensor>> {
        let shape = [mel.batch_size(), mel.shape()[1] * 2];
        Ok(Synthesis {
            signal: HostTensor::full(&shape, self.bias),
            aux: HostTensor::zeros(&shape),
            harmonic: HostTensor::zeros(&shape),
            noise: HostTensor::zeros(&shape),
        })
    }

    fn num_parameters(&self) -> usize {
        1
    }
}

impl TrainableVocoder for ToyVocoder {
    type Gradients = ();

    fn loss_and_gradients<L>(
        &mut self,
        batch: &Batch<HostTensor>,
        loss_fn: &L,
        options: &LossOptions,
    ) -> Result<(LossOutput<HostTensor>, ())>
    where
        L: VocoderLoss<HostTensor>,
    {
        let synthesis = self.forward(&batch.mel, &batch.f0, ForwardMode::Train)?;
        let output = loss_fn.compute(
            &synthesis.signal,
            &synthesis.harmonic,
            &batch.audio,
            &batch.uv,
            options,
        )?;
        Ok((output, ()))
    }
}

impl Checkpoint for ToyVocoder {
    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join("kind"), self.kind.as_str())?;
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        self.kind = std::fs::read_to_string(dir.join("kind"))?.parse()?;
        Ok(())
    }
}

struct Adam<'a> {
    events: &'a RefCell<Vec<String>>,
}

impl Optimizer<ToyVocoder> for Adam<'_> {
    fn zero_grad(&mut self) {}

    fn step(&mut self, model: &mut ToyVocoder, _gradients: ()) -> Result<()> {
        model.bias += 0.125;
        Ok(())
    }

    fn set_hyperparameters(&mut self, learning_rate: f64, weight_decay: f64) {
        self.events
            .borrow_mut()
            .push(format!("hyperparameters {} {}", learning_rate, weight_decay));
    }
}

impl Checkpoint for Adam<'_> {
    fn save(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, _dir: &Path) -> Result<()> {
        self.events.borrow_mut().push("optimizer restored".into());
        Ok(())
    }
}

struct ConstantLoss;

impl VocoderLoss<HostTensor> for ConstantLoss {
    fn compute(
        &self,
        _signal: &HostTensor,
        _harmonic: &HostTensor,
        _audio: &HostTensor,
        _uv: &HostTensor,
        options: &LossOptions,
    ) -> Result<LossOutput<HostTensor>> {
        let breakdown: LossBreakdown = [
            (options.phase.key("loss"), 0.5),
            (options.phase.key("loss_rss"), 0.25),
        ]
        .into_iter()
        .collect();
        Ok(LossOutput {
            loss: HostTensor::scalar(0.5),
            breakdown,
        })
    }
}

struct Loader(usize);

impl BatchSource<HostTensor> for Loader {
    fn num_batches(&self) -> usize {
        self.0
    }

    fn batches(&mut self) -> impl Iterator<Item = Result<Batch<HostTensor>>> + '_ {
        (0..self.0).map(|i| {
            Batch::new(
                vec![format!("clip{}", i)],
                HostTensor::zeros(&[1, 3, 2]),
                HostTensor::zeros(&[1, 3, 1]),
                HostTensor::zeros(&[1, 6]),
                HostTensor::zeros(&[1, 3]),
            )
        })
    }
}

#[derive(Default)]
struct HostBackend {
    events: RefCell<Vec<String>>,
}

impl VocoderFactory for HostBackend {
    type Model = ToyVocoder;

    fn sins(&self, _model: &SinsConfig, _data: &DataConfig) -> Result<ToyVocoder> {
        self.events.borrow_mut().push("built Sins".into());
        Ok(ToyVocoder {
            kind: ModelKind::Sins,
            bias: 0.0,
        })
    }

    fn comb_sub(&self, _model: &CombSubConfig, _data: &DataConfig) -> Result<ToyVocoder> {
        self.events.borrow_mut().push("built CombSub".into());
        Ok(ToyVocoder {
            kind: ModelKind::CombSub,
            bias: 0.0,
        })
    }
}

impl<'a> Backend for &'a HostBackend {
    type Vocoder = ToyVocoder;
    type Factory = HostBackend;
    type Optimizer = Adam<'a>;
    type Loss = ConstantLoss;
    type Loader = Loader;

    fn factory(&self) -> &HostBackend {
        self
    }

    fn optimizer(&self, _train: &TrainConfig) -> Result<Adam<'a>> {
        let backend: &'a HostBackend = *self;
        Ok(Adam {
            events: &backend.events,
        })
    }

    fn loss(&self, _loss: &LossConfig, _data: &DataConfig) -> Result<ConstantLoss> {
        Ok(ConstantLoss)
    }

    fn loaders(&self, _config: &DdspConfig) -> Result<(Loader, Loader)> {
        Ok((Loader(3), Loader(2)))
    }

    fn select_device(&self, device: Device, gpu_id: usize) -> Result<()> {
        self.events
            .borrow_mut()
            .push(format!("device {:?} {}", device, gpu_id));
        Ok(())
    }
}

fn write_config(dir: &TempDir, model_type: &str) -> Cli {
    let expdir = dir.path().join("exp");
    let yaml = format!(
        "device: cpu\nenv:\n  expdir: {}\n  gpu_id: 1\ndata:\n  sampling_rate: 24000\nmodel:\n  type: {}\ntrain:\n  lr: 0.002\n  weight_decay: 0.01\n  epochs: 2\n  interval_log: 2\n  interval_val: 3\n  save_opt: true\n",
        expdir.display(),
        model_type
    );
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, yaml).unwrap();
    Cli { config: path }
}

#[test]
fn test_run_trains_and_resumes() {
    let dir = TempDir::new().unwrap();
    let cli = write_config(&dir, "CombSub");
    let backend = HostBackend::default();

    run(&cli, &&backend).unwrap();

    let expdir = dir.path().join("exp");
    let saved = DdspConfig::load(expdir.join("config.yaml")).unwrap();
    assert_eq!(saved.model.kind(), ModelKind::CombSub);
    assert_eq!(saved.env.gpu_id, 1);

    // 2 epochs x 3 batches, validation every 3 steps
    assert!(expdir.join("checkpoints/step_3").is_dir());
    assert!(expdir.join("checkpoints/step_6/optimizer").is_dir());
    assert!(expdir.join("samples/step_6/clip1/pred.wav").exists());

    assert_eq!(
        *backend.events.borrow(),
        vec![
            "built CombSub".to_string(),
            "hyperparameters 0.002 0.01".to_string(),
            "device Cpu 1".to_string(),
        ]
    );

    backend.events.borrow_mut().clear();
    run(&cli, &&backend).unwrap();

    assert!(expdir.join("checkpoints/step_9").is_dir());
    assert!(expdir.join("checkpoints/step_12").is_dir());
    assert_eq!(
        backend.events.borrow()[..3],
        [
            "built CombSub".to_string(),
            "optimizer restored".to_string(),
            "hyperparameters 0.002 0.01".to_string(),
        ]
    );
}

#[test]
fn test_unknown_model_rejected_before_training() {
    let dir = TempDir::new().unwrap();
    let cli = write_config(&dir, "NSF");
    let backend = HostBackend::default();

    let err = run(&cli, &&backend).unwrap_err();

    match err.downcast_ref::<DdspError>() {
        Some(DdspError::UnknownModel(name)) => assert_eq!(name, "NSF"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(backend.events.borrow().is_empty());
    assert!(!dir.path().join("exp").exists());
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let cli = Cli {
        config: dir.path().join("missing.yaml"),
    };
    let backend = HostBackend::default();

    let err = run(&cli, &&backend).unwrap_err();
    assert!(err.to_string().contains("missing.yaml"));
}
