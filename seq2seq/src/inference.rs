use std::path::Path;

use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::{
    config::TrainingConfig,
    data::{Scaler, SeqBatcher},
    error::{Error, Result},
    model::Seq2Seq,
};

/// A trained model with the configuration and scaler it was trained with.
pub struct Forecaster<B: Backend> {
    config: TrainingConfig,
    scaler: Scaler,
    model: Seq2Seq<B>,
    device: B::Device,
}

/// Reads the configuration, scaler and model record written by
/// [`train`](crate::training::train).
pub(crate) fn load_artifacts<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<(TrainingConfig, Scaler, Seq2Seq<B>)> {
    let config = TrainingConfig::load_validated(artifact_dir.join("config.json"))?;
    let scaler = Scaler::load(artifact_dir.join("scaler.json"))
        .map_err(|e| Error::Config(format!("{e:?}")))?;
    let record = CompactRecorder::new()
        .load(artifact_dir.join("model"), device)
        .map_err(|e| Error::Recorder(format!("{e:?}")))?;

    let model = config.model.init::<B>(device).load_record(record);
    Ok((config, scaler, model))
}

impl<B: Backend> Forecaster<B> {
    pub fn load<P: AsRef<Path>>(artifact_dir: P, device: B::Device) -> Result<Self> {
        let (config, scaler, model) = load_artifacts(artifact_dir.as_ref(), &device)?;

        Ok(Self {
            config,
            scaler,
            model,
            device,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Forecasts `n_step` steps following `history`. Only the last `enc_len`
    /// observations are fed to the encoder.
    pub fn forecast(&self, history: &[Vec<f32>], n_step: usize) -> Result<Vec<Vec<f32>>> {
        let enc_len = self.config.window.enc_len;
        let target_size = self.config.model.target_size;
        if n_step == 0 {
            return Err(Error::InvalidConfig(
                "at least one step must be forecast".to_string(),
            ));
        }
        if history.len() < enc_len {
            return Err(Error::SeriesTooShort {
                len: history.len(),
                required: enc_len,
            });
        }
        if history.iter().any(|row| row.len() != target_size) {
            return Err(Error::InvalidConfig(format!(
                "history rows must have {target_size} features"
            )));
        }

        let window = self.scaler.transform(&history[history.len() - enc_len..]);
        let batcher = SeqBatcher::<B>::new(self.device.clone());
        let enc_seqs = batcher.tensor([&window]);
        let output = self.model.forward(enc_seqs, n_step);

        let values = output.into_data().convert::<f32>().value;
        let scaled: Vec<Vec<f32>> = values
            .chunks(target_size)
            .map(<[f32]>::to_vec)
            .collect();

        Ok(self.scaler.inverse(&scaled))
    }
}
