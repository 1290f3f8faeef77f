//! The hooks a [`Trainer`](crate::trainer::Trainer) drives, and the seq2seq
//! forecaster that implements them.

use std::{collections::BTreeMap, sync::Arc};

use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use log::warn;

use crate::{
    config::TrainingConfig,
    data::{DataLoaders, SeqBatch, SeqDataLoader},
    error::Result,
    forcing::{Bernoulli, TeacherForcing},
    model::Seq2Seq,
    optim::ConfiguredOptimizer,
};

/// Scalar values reported under their metric names.
pub type LogRecord = BTreeMap<String, f64>;

pub struct TrainingStepOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub log: LogRecord,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationStepOutput {
    pub val_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochLog {
    pub progress_bar: LogRecord,
    pub log: LogRecord,
}

impl EpochLog {
    pub fn val_loss(&self) -> Option<f64> {
        self.log.get("val_loss").copied()
    }
}

/// Training-loop hooks. The trainer owns the loop and the optimizer and
/// calls these explicitly.
pub trait TrainingModule<B: AutodiffBackend> {
    type Model: AutodiffModule<B> + 'static;
    type TrainBatch;
    type ValidBatch;

    fn model(&self) -> &Self::Model;

    /// Installs the parameters produced by an optimizer step.
    fn set_model(&mut self, model: Self::Model);

    fn training_step(&mut self, batch: &Self::TrainBatch, batch_idx: usize) -> TrainingStepOutput<B>;

    fn validation_step(&self, batch: &Self::ValidBatch, batch_idx: usize) -> ValidationStepOutput;

    fn validation_end(&self, outputs: &[ValidationStepOutput]) -> EpochLog;

    fn configure_optimizers(&self) -> ConfiguredOptimizer<Self::Model, B>;

    fn train_dataloader(&self) -> Option<Arc<dyn DataLoader<Self::TrainBatch>>>;

    fn val_dataloader(&self) -> Option<Arc<dyn DataLoader<Self::ValidBatch>>>;

    fn test_dataloader(&self) -> Option<Arc<dyn DataLoader<Self::ValidBatch>>>;
}

/// Encoder/decoder forecaster trained with teacher forcing.
pub struct Seq2SeqForecaster<B: AutodiffBackend> {
    model: Seq2Seq<B>,
    config: TrainingConfig,
    forcing: Box<dyn TeacherForcing>,
    loaders: DataLoaders<B>,
}

impl<B: AutodiffBackend> Seq2SeqForecaster<B> {
    /// Validates `config` and initializes a fresh model on `device`. Teacher
    /// forcing draws from a generator seeded with `config.seed`.
    pub fn new(config: TrainingConfig, loaders: DataLoaders<B>, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let model = config.model.init(device);
        let forcing = Bernoulli::new(config.teacher_forcing_rate, config.seed);

        Ok(Self {
            model,
            config,
            forcing: Box::new(forcing),
            loaders,
        })
    }

    /// Replaces the teacher forcing policy.
    pub fn with_forcing(mut self, forcing: impl TeacherForcing + 'static) -> Self {
        self.forcing = Box::new(forcing);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn into_model(self) -> Seq2Seq<B> {
        self.model
    }

    /// Autoregressive forecast with the current parameters.
    pub fn forward(&self, enc_seqs: Tensor<B, 3>, n_step: usize) -> Tensor<B, 3> {
        self.model.forward(enc_seqs, n_step)
    }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}

impl<B: AutodiffBackend> TrainingModule<B> for Seq2SeqForecaster<B> {
    type Model = Seq2Seq<B>;
    type TrainBatch = SeqBatch<B>;
    type ValidBatch = SeqBatch<B::InnerBackend>;

    fn model(&self) -> &Self::Model {
        &self.model
    }

    fn set_model(&mut self, model: Self::Model) {
        self.model = model;
    }

    fn training_step(&mut self, batch: &SeqBatch<B>, _batch_idx: usize) -> TrainingStepOutput<B> {
        let outputs = self.model.forward_teacher_forced(
            batch.enc_inputs.clone(),
            batch.dec_inputs.clone(),
            batch.dec_outputs.clone(),
            self.forcing.as_mut(),
        );
        let loss = MseLoss::new().forward(outputs, batch.dec_outputs.clone(), Reduction::Mean);

        let log = LogRecord::from([("train_loss".to_string(), scalar(loss.clone()))]);
        TrainingStepOutput { loss, log }
    }

    fn validation_step(&self, batch: &SeqBatch<B::InnerBackend>, _batch_idx: usize) -> ValidationStepOutput {
        let [_, n_step, _] = batch.dec_outputs.dims();
        let model = self.model.valid();
        let predicted = model.forward(batch.enc_inputs.clone(), n_step);
        let loss = MseLoss::new().forward(predicted, batch.dec_outputs.clone(), Reduction::Mean);

        ValidationStepOutput {
            val_loss: scalar(loss),
        }
    }

    /// Unweighted mean over batches; a short final batch counts as much as
    /// a full one.
    fn validation_end(&self, outputs: &[ValidationStepOutput]) -> EpochLog {
        if outputs.is_empty() {
            warn!("validation produced no batches");
        }
        let total: f64 = outputs.iter().map(|output| output.val_loss).sum();
        let val_loss = total / outputs.len() as f64;

        let log = LogRecord::from([("val_loss".to_string(), val_loss)]);
        EpochLog {
            progress_bar: log.clone(),
            log,
        }
    }

    fn configure_optimizers(&self) -> ConfiguredOptimizer<Self::Model, B> {
        ConfiguredOptimizer::new(self.config.optimizer, self.config.lr)
    }

    fn train_dataloader(&self) -> Option<SeqDataLoader<B>> {
        self.loaders.train.clone()
    }

    fn val_dataloader(&self) -> Option<SeqDataLoader<B::InnerBackend>> {
        self.loaders.valid.clone()
    }

    fn test_dataloader(&self) -> Option<SeqDataLoader<B::InnerBackend>> {
        self.loaders.test.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WindowConfig,
        data::{SeqBatcher, SeriesDataset},
        forcing::{Always, Never},
        model::Seq2SeqConfig,
        optim::OptimizerKind,
    };
    use burn::{
        backend::{Autodiff, NdArray},
        data::{dataloader::batcher::Batcher, dataset::Dataset},
        module::{ModuleVisitor, ParamId},
        optim::GradientsParams,
    };

    type TestBackend = Autodiff<NdArray>;

    fn config() -> TrainingConfig {
        TrainingConfig::new(Seq2SeqConfig::new(1, 6), WindowConfig::new(5, 3))
            .with_optimizer(OptimizerKind::Adam)
            .with_lr(0.01)
    }

    fn forecaster() -> Seq2SeqForecaster<TestBackend> {
        Seq2SeqForecaster::new(config(), DataLoaders::default(), &Default::default()).unwrap()
    }

    fn batch<B: Backend>() -> SeqBatch<B> {
        let series: Vec<Vec<f32>> = (0..16).map(|i| vec![(i as f32 * 0.5).sin()]).collect();
        let dataset = SeriesDataset::windows(&series, 5, 3).unwrap();
        let items = (0..4).filter_map(|i| dataset.get(i)).collect();
        SeqBatcher::<B>::new(Default::default()).batch(items)
    }

    fn max_abs_diff<B: Backend>(a: Tensor<B, 3>, b: Tensor<B, 3>) -> f64 {
        (a - b).abs().max().into_scalar().elem::<f64>()
    }

    #[derive(Default)]
    struct Collect {
        params: Vec<Vec<f32>>,
    }

    impl<B: Backend> ModuleVisitor<B> for Collect {
        fn visit_float<const D: usize>(&mut self, _id: &ParamId, tensor: &Tensor<B, D>) {
            self.params.push(tensor.to_data().convert::<f32>().value);
        }
    }

    fn params(model: &Seq2Seq<TestBackend>) -> Vec<Vec<f32>> {
        let mut collect = Collect::default();
        model.visit(&mut collect);
        collect.params
    }

    #[test]
    fn validation_end_is_unweighted_mean() {
        let outputs = [
            ValidationStepOutput { val_loss: 1.0 },
            ValidationStepOutput { val_loss: 3.0 },
        ];
        let log = forecaster().validation_end(&outputs);

        assert_eq!(log.val_loss(), Some(2.0));
        assert_eq!(log.progress_bar, log.log);
    }

    #[test]
    fn validation_end_without_batches_is_nan() {
        let log = forecaster().validation_end(&[]);
        assert!(log.val_loss().unwrap().is_nan());
    }

    #[test]
    fn full_teacher_forcing_feeds_ground_truth() {
        let mut module = forecaster().with_forcing(Always);
        let batch = batch::<TestBackend>();

        let step = module.training_step(&batch, 0);
        let expected = module.model().forward_teacher_forced(
            batch.enc_inputs.clone(),
            batch.dec_inputs.clone(),
            batch.dec_outputs.clone(),
            &mut |_: usize| true,
        );
        let expected_loss = MseLoss::new().forward(expected, batch.dec_outputs.clone(), Reduction::Mean);

        let loss = step.loss.into_scalar().elem::<f64>();
        assert!((loss - expected_loss.into_scalar().elem::<f64>()).abs() < 1e-6);
        assert_eq!(step.log.get("train_loss").copied(), Some(loss));
    }

    #[test]
    fn zero_rate_training_matches_forward() {
        let module = forecaster().with_forcing(Never);
        let train_batch = batch::<TestBackend>();

        let trained = module.model().forward_teacher_forced(
            train_batch.enc_inputs.clone(),
            train_batch.dec_inputs.clone(),
            train_batch.dec_outputs.clone(),
            &mut Never,
        );
        let predicted = module.forward(train_batch.enc_inputs.clone(), 3);
        assert!(max_abs_diff(trained, predicted) < 1e-6);

        let zero_rate = config().with_teacher_forcing_rate(0.0);
        let mut seeded =
            Seq2SeqForecaster::<TestBackend>::new(zero_rate, DataLoaders::default(), &Default::default()).unwrap();
        seeded.set_model(module.model().clone());
        let step = seeded.training_step(&train_batch, 0);
        let valid = module.validation_step(&batch::<NdArray>(), 0);
        assert!((step.loss.into_scalar().elem::<f64>() - valid.val_loss).abs() < 1e-5);
    }

    #[test]
    fn configured_optimizer_updates_every_parameter() {
        let mut module = forecaster();
        let mut optim = module.configure_optimizers();
        assert_eq!(optim.kind(), OptimizerKind::Adam);
        assert_eq!(optim.lr(), 0.01);

        let before = params(module.model());
        let step = module.training_step(&batch::<TestBackend>(), 0);
        let grads = GradientsParams::from_grads(step.loss.backward(), module.model());
        let updated = optim.step(module.model().clone(), grads);
        let after = params(&updated);

        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(&after).all(|(b, a)| b != a));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let result = Seq2SeqForecaster::<TestBackend>::new(
            config().with_teacher_forcing_rate(2.0),
            DataLoaders::default(),
            &Default::default(),
        );
        assert!(matches!(result, Err(crate::error::Error::InvalidTeacherForcingRate(_))));
    }

    #[test]
    fn loaders_are_handed_out_as_injected() {
        let module = forecaster();
        assert!(module.train_dataloader().is_none());
        assert!(module.val_dataloader().is_none());
        assert!(module.test_dataloader().is_none());
    }
}
