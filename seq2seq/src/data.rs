use std::{path::Path, sync::Arc};

use burn::data::dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// Reads the named columns of a headed csv file as a multivariate series,
/// one `Vec` of features per row.
pub fn load_series<P: AsRef<Path>>(path: P, columns: &[String]) -> error::Result<Vec<Vec<f32>>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let indices = columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|header| header.trim() == column)
                .ok_or_else(|| Error::MissingColumn(column.clone()))
        })
        .collect::<error::Result<Vec<_>>>()?;

    let mut series = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let values = indices
            .iter()
            .zip(columns)
            .map(|(&index, column)| {
                record
                    .get(index)
                    .unwrap_or_default()
                    .trim()
                    .parse::<f32>()
                    .map_err(|source| Error::Parse {
                        row,
                        column: column.clone(),
                        source,
                    })
            })
            .collect::<error::Result<Vec<_>>>()?;
        series.push(values);
    }

    Ok(series)
}

/// Chronological split into train, validation and test segments.
pub fn split_series(
    series: &[Vec<f32>],
    valid_ratio: f64,
    test_ratio: f64,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let len = series.len();
    let n_test = (len as f64 * test_ratio).round() as usize;
    let n_valid = (len as f64 * valid_ratio).round() as usize;
    let n_train = len.saturating_sub(n_test + n_valid);
    let valid_end = (n_train + n_valid).min(len);

    (
        series[..n_train].to_vec(),
        series[n_train..valid_end].to_vec(),
        series[valid_end..].to_vec(),
    )
}

/// Per-feature standardisation fitted on the training segment.
#[derive(Config, Debug)]
pub struct Scaler {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Scaler {
    pub fn fit(series: &[Vec<f32>]) -> Self {
        let features = series.first().map(Vec::len).unwrap_or_default();
        let count = series.len().max(1) as f32;

        let mean: Vec<f32> = (0..features)
            .map(|f| series.iter().map(|row| row[f]).sum::<f32>() / count)
            .collect();
        let std = (0..features)
            .map(|f| {
                let var = series
                    .iter()
                    .map(|row| (row[f] - mean[f]).powi(2))
                    .sum::<f32>()
                    / count;
                // Constant features keep their offset but are not rescaled.
                if var > f32::EPSILON {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, std }
    }

    pub fn transform(&self, series: &[Vec<f32>]) -> Vec<Vec<f32>> {
        series
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(f, v)| (v - self.mean[f]) / self.std[f])
                    .collect()
            })
            .collect()
    }

    pub fn inverse(&self, series: &[Vec<f32>]) -> Vec<Vec<f32>> {
        series
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(f, v)| v * self.std[f] + self.mean[f])
                    .collect()
            })
            .collect()
    }
}

/// One training window cut out of a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowItem {
    pub enc_inputs: Vec<Vec<f32>>,
    /// Shifted one step back from `dec_outputs`, so its first step is the
    /// last encoder step.
    pub dec_inputs: Vec<Vec<f32>>,
    pub dec_outputs: Vec<Vec<f32>>,
}

pub struct SeriesDataset {
    dataset: InMemDataset<WindowItem>,
}

impl SeriesDataset {
    /// Every window of `enc_len + dec_len` consecutive steps, with stride one.
    pub fn windows(series: &[Vec<f32>], enc_len: usize, dec_len: usize) -> error::Result<Self> {
        let required = enc_len + dec_len;
        if enc_len == 0 || dec_len == 0 || series.len() < required {
            return Err(Error::SeriesTooShort {
                len: series.len(),
                required,
            });
        }

        let items = (0..=series.len() - required)
            .map(|start| {
                let split = start + enc_len;
                WindowItem {
                    enc_inputs: series[start..split].to_vec(),
                    dec_inputs: series[split - 1..split + dec_len - 1].to_vec(),
                    dec_outputs: series[split..split + dec_len].to_vec(),
                }
            })
            .collect();

        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }
}

impl Dataset<WindowItem> for SeriesDataset {
    fn get(&self, index: usize) -> Option<WindowItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

#[derive(Clone)]
pub struct SeqBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SeqBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Stacks equally long sequences into `[batch_size, seq_len, features]`.
    pub fn tensor<'a, I>(&self, sequences: I) -> Tensor<B, 3>
    where
        I: IntoIterator<Item = &'a Vec<Vec<f32>>>,
    {
        let sequences: Vec<_> = sequences.into_iter().collect();
        let batch_size = sequences.len();
        let seq_len = sequences.first().map(|s| s.len()).unwrap_or_default();
        let features = sequences
            .first()
            .and_then(|s| s.first())
            .map(Vec::len)
            .unwrap_or_default();
        let values: Vec<f32> = sequences.into_iter().flatten().flatten().copied().collect();

        Tensor::from_data(
            Data::new(values, Shape::new([batch_size, seq_len, features])).convert(),
            &self.device,
        )
    }
}

#[derive(Clone, Debug)]
pub struct SeqBatch<B: Backend> {
    /// [batch_size, enc_len, target_size]
    pub enc_inputs: Tensor<B, 3>,
    /// [batch_size, dec_len, target_size]
    pub dec_inputs: Tensor<B, 3>,
    /// [batch_size, dec_len, target_size]
    pub dec_outputs: Tensor<B, 3>,
}

impl<B: Backend> SeqBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.enc_inputs.dims()[0]
    }
}

impl<B: Backend> Batcher<WindowItem, SeqBatch<B>> for SeqBatcher<B> {
    fn batch(&self, items: Vec<WindowItem>) -> SeqBatch<B> {
        SeqBatch {
            enc_inputs: self.tensor(items.iter().map(|item| &item.enc_inputs)),
            dec_inputs: self.tensor(items.iter().map(|item| &item.dec_inputs)),
            dec_outputs: self.tensor(items.iter().map(|item| &item.dec_outputs)),
        }
    }
}

pub type SeqDataLoader<B> = Arc<dyn DataLoader<SeqBatch<B>>>;

/// The loaders a training module hands to the trainer. Validation and test
/// batches live on the inner backend so evaluation runs without autodiff.
pub struct DataLoaders<B: AutodiffBackend> {
    pub train: Option<SeqDataLoader<B>>,
    pub valid: Option<SeqDataLoader<B::InnerBackend>>,
    pub test: Option<SeqDataLoader<B::InnerBackend>>,
}

impl<B: AutodiffBackend> Clone for DataLoaders<B> {
    fn clone(&self) -> Self {
        Self::new(self.train.clone(), self.valid.clone(), self.test.clone())
    }
}

impl<B: AutodiffBackend> Default for DataLoaders<B> {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

impl<B: AutodiffBackend> DataLoaders<B> {
    pub fn new(
        train: Option<SeqDataLoader<B>>,
        valid: Option<SeqDataLoader<B::InnerBackend>>,
        test: Option<SeqDataLoader<B::InnerBackend>>,
    ) -> Self {
        Self { train, valid, test }
    }

    /// Builds the three loaders over windowed datasets. The training loader
    /// shuffles with `seed`.
    pub fn from_datasets(
        train: SeriesDataset,
        valid: SeriesDataset,
        test: SeriesDataset,
        batch_size: usize,
        num_workers: usize,
        seed: u64,
        device: &B::Device,
    ) -> Self {
        let train = DataLoaderBuilder::new(SeqBatcher::<B>::new(device.clone()))
            .batch_size(batch_size)
            .shuffle(seed)
            .num_workers(num_workers)
            .build(train);
        let valid = DataLoaderBuilder::new(SeqBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(batch_size)
            .num_workers(num_workers)
            .build(valid);
        let test = DataLoaderBuilder::new(SeqBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(batch_size)
            .num_workers(num_workers)
            .build(test);

        Self::new(Some(train), Some(valid), Some(test))
    }
}
