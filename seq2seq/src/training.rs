use std::path::Path;

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use log::info;

use crate::{
    config::TrainingConfig,
    data::{split_series, DataLoaders, Scaler, SeqBatcher, SeriesDataset},
    error::{Error, Result},
    inference::load_artifacts,
    module::{EpochLog, Seq2SeqForecaster, TrainingModule},
    trainer::{FitHistory, Trainer},
};

pub struct TrainingReport {
    pub history: FitHistory,
    pub test_loss: Option<f64>,
}

fn create_artifact_dir(artifact_dir: &Path) -> Result<()> {
    // A stale record must never be loaded against a new config.
    if artifact_dir.exists() {
        std::fs::remove_dir_all(artifact_dir)?;
    }
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

fn check_features(series: &[Vec<f32>], target_size: usize) -> Result<()> {
    match series.iter().find(|row| row.len() != target_size) {
        Some(row) => Err(Error::InvalidConfig(format!(
            "series has {} features per step but target_size is {}",
            row.len(),
            target_size
        ))),
        None => Ok(()),
    }
}

/// Trains a forecaster on `series` and writes `config.json`, `scaler.json`
/// and the model record to `artifact_dir`.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    series: &[Vec<f32>],
    device: B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    let artifact_dir = Path::new(artifact_dir);
    check_features(series, config.model.target_size)?;

    let window = &config.window;
    let (train, valid, test) = split_series(series, window.valid_ratio, window.test_ratio);
    let scaler = Scaler::fit(&train);
    info!(
        "Split {} steps into {} train, {} valid, {} test",
        series.len(),
        train.len(),
        valid.len(),
        test.len()
    );

    let dataset = |segment: &[Vec<f32>]| {
        SeriesDataset::windows(&scaler.transform(segment), window.enc_len, window.dec_len)
    };
    let loaders = DataLoaders::<B>::from_datasets(
        dataset(&train)?,
        dataset(&valid)?,
        dataset(&test)?,
        config.batch_size,
        config.num_workers,
        config.seed,
        &device,
    );

    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join("config.json"))?;
    scaler.save(artifact_dir.join("scaler.json"))?;

    B::seed(config.seed);
    let mut module = Seq2SeqForecaster::new(config.clone(), loaders, &device)?;
    info!("Model has {} parameters", module.model().num_params());

    let trainer = Trainer::new(config.num_epochs);
    let history = trainer.fit(&mut module)?;
    let test_loss = trainer.test(&module)?.val_loss();

    module
        .into_model()
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())
        .map_err(|e| Error::Recorder(format!("{e:?}")))?;
    info!("Saved artifacts to {}", artifact_dir.display());

    Ok(TrainingReport { history, test_loss })
}

/// Scores the artifacts in `artifact_dir` on every window of `series`. The
/// series is scaled with the saved scaler and the returned log holds the
/// unweighted mean of the per-batch validation losses.
pub fn evaluate<B: AutodiffBackend>(
    artifact_dir: &str,
    series: &[Vec<f32>],
    device: B::Device,
) -> Result<EpochLog> {
    let (config, scaler, model) = load_artifacts::<B>(Path::new(artifact_dir), &device)?;
    check_features(series, config.model.target_size)?;

    let window = &config.window;
    let dataset = SeriesDataset::windows(&scaler.transform(series), window.enc_len, window.dec_len)?;
    info!("Evaluating on {} windows", dataset.len());
    let test = DataLoaderBuilder::new(SeqBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset);

    let loaders = DataLoaders::<B>::new(None, None, Some(test));
    let mut module = Seq2SeqForecaster::new(config, loaders, &device)?;
    module.set_model(model);

    Trainer::default().test(&module)
}
