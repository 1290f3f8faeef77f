use burn::{optim::GradientsParams, tensor::backend::AutodiffBackend};
use log::{debug, info};

use crate::{
    error::{Error, Result},
    module::{EpochLog, TrainingModule, ValidationStepOutput},
};

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    /// Mean of the training step losses of the epoch.
    pub train_loss: f64,
    pub val_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitHistory {
    pub epochs: Vec<EpochSummary>,
}

impl FitHistory {
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.epochs
            .iter()
            .filter_map(|epoch| epoch.val_loss)
            .filter(|loss| !loss.is_nan())
            .reduce(f64::min)
    }
}

/// Drives the epoch and batch loops of a [`TrainingModule`].
#[derive(Debug, Clone)]
pub struct Trainer {
    max_epochs: usize,
}

impl Trainer {
    pub fn new(max_epochs: usize) -> Self {
        Self { max_epochs }
    }

    /// Trains `module` for `max_epochs` epochs, validating after each one
    /// when the module provides a validation loader.
    pub fn fit<B, M>(&self, module: &mut M) -> Result<FitHistory>
    where
        B: AutodiffBackend,
        M: TrainingModule<B>,
    {
        let train_loader = module
            .train_dataloader()
            .ok_or(Error::MissingDataLoader("train"))?;
        let mut optim = module.configure_optimizers();
        let mut history = FitHistory::default();

        info!(
            "Training for {} epochs with {} at lr {}",
            self.max_epochs,
            optim.kind(),
            optim.lr()
        );

        for epoch in 1..=self.max_epochs {
            let mut total_loss = 0.0;
            let mut batch_count = 0;

            for (batch_idx, batch) in train_loader.iter().enumerate() {
                let output = module.training_step(&batch, batch_idx);
                let loss = output.log.get("train_loss").copied().unwrap_or(f64::NAN);

                let grads = output.loss.backward();
                let grads = GradientsParams::from_grads(grads, module.model());
                let model = optim.step(module.model().clone(), grads);
                module.set_model(model);

                debug!("epoch {epoch} batch {batch_idx}: train_loss = {loss:.6}");
                total_loss += loss;
                batch_count += 1;
            }

            let train_loss = total_loss / batch_count as f64;
            let val_loss = self.validate(module)?.and_then(|log| log.val_loss());

            match val_loss {
                Some(val_loss) => info!(
                    "Epoch {}/{}: train_loss = {:.6}, val_loss = {:.6}",
                    epoch, self.max_epochs, train_loss, val_loss
                ),
                None => info!(
                    "Epoch {}/{}: train_loss = {:.6}",
                    epoch, self.max_epochs, train_loss
                ),
            }

            history.epochs.push(EpochSummary {
                epoch,
                train_loss,
                val_loss,
            });
        }

        Ok(history)
    }

    /// Runs the validation hooks over the test loader.
    pub fn test<B, M>(&self, module: &M) -> Result<EpochLog>
    where
        B: AutodiffBackend,
        M: TrainingModule<B>,
    {
        let loader = module
            .test_dataloader()
            .ok_or(Error::MissingDataLoader("test"))?;
        let outputs: Vec<ValidationStepOutput> = loader
            .iter()
            .enumerate()
            .map(|(batch_idx, batch)| module.validation_step(&batch, batch_idx))
            .collect();
        let log = module.validation_end(&outputs);

        if let Some(test_loss) = log.val_loss() {
            info!("Test loss = {test_loss:.6}");
        }
        Ok(log)
    }

    fn validate<B, M>(&self, module: &M) -> Result<Option<EpochLog>>
    where
        B: AutodiffBackend,
        M: TrainingModule<B>,
    {
        let Some(loader) = module.val_dataloader() else {
            return Ok(None);
        };
        let outputs: Vec<ValidationStepOutput> = loader
            .iter()
            .enumerate()
            .map(|(batch_idx, batch)| module.validation_step(&batch, batch_idx))
            .collect();

        Ok(Some(module.validation_end(&outputs)))
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(1)
    }
}
