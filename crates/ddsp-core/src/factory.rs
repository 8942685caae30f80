//! Model construction from a [`ModelSpec`].

use crate::{CombSubConfig, DataConfig, ModelSpec, Result, SinsConfig};

/// Builds the concrete model for each [`ModelSpec`] variant.
pub trait VocoderFactory {
    /// Model type produced by the factory.
    type Model;

    /// Build a sinusoidal harmonic model.
    fn sins(&self, model: &SinsConfig, data: &DataConfig) -> Result<Self::Model>;

    /// Build a combtooth-subtractive model.
    fn comb_sub(&self, model: &CombSubConfig, data: &DataConfig) -> Result<Self::Model>;
}

impl ModelSpec {
    /// Build the model through `factory`.
    pub fn build<F: VocoderFactory>(&self, data: &DataConfig, factory: &F) -> Result<F::Model> {
        tracing::debug!(kind = %self.kind(), "building model");
        match self {
            Self::Sins(model) => factory.sins(model, data),
            Self::CombSub(model) => factory.comb_sub(model, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelKind;

    struct Describe;

    impl VocoderFactory for Describe {
        type Model = String;

        fn sins(&self, model: &SinsConfig, data: &DataConfig) -> Result<String> {
            Ok(format!("sins:{}:{}", model.n_harmonics, data.n_mels))
        }

        fn comb_sub(&self, model: &CombSubConfig, data: &DataConfig) -> Result<String> {
            Ok(format!("combsub:{}:{}", model.n_mag_harmonic, data.block_size))
        }
    }

    #[test]
    fn test_build_dispatches_on_variant() {
        let data = DataConfig::default();
        let sins = ModelSpec::Sins(SinsConfig::default());
        assert_eq!(sins.kind(), ModelKind::Sins);
        assert_eq!(sins.build(&data, &Describe).unwrap(), "sins:128:128");

        let comb = ModelSpec::CombSub(CombSubConfig::default());
        assert_eq!(comb.build(&data, &Describe).unwrap(), "combsub:512:512");
    }
}
