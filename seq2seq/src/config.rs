use burn::prelude::*;

use crate::{
    error::{self, Error},
    model::Seq2SeqConfig,
    optim::OptimizerKind,
};

/// How a series is cut into encoder/decoder windows and split over time.
#[derive(Config, Debug)]
pub struct WindowConfig {
    pub enc_len: usize,
    pub dec_len: usize,
    #[config(default = "0.15")]
    pub valid_ratio: f64,
    #[config(default = "0.15")]
    pub test_ratio: f64,
}

impl WindowConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.enc_len == 0 || self.dec_len == 0 {
            return Err(Error::InvalidConfig(format!(
                "window lengths must be positive, got enc_len={} dec_len={}",
                self.enc_len, self.dec_len
            )));
        }
        let ratios = [self.valid_ratio, self.test_ratio];
        if ratios.iter().any(|r| !(0.0..1.0).contains(r)) || self.valid_ratio + self.test_ratio >= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "valid_ratio={} and test_ratio={} must leave room for training data",
                self.valid_ratio, self.test_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: Seq2SeqConfig,
    pub window: WindowConfig,
    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,
    #[config(default = "1.0e-3")]
    pub lr: f64,
    /// Probability of feeding the ground truth instead of the prediction
    /// at each decoder step of a training pass.
    #[config(default = "0.5")]
    pub teacher_forcing_rate: f64,
    #[config(default = "20")]
    pub num_epochs: usize,
    #[config(default = "32")]
    pub batch_size: usize,
    #[config(default = "1")]
    pub num_workers: usize,
    #[config(default = "42")]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> error::Result<()> {
        if !(0.0..=1.0).contains(&self.teacher_forcing_rate) {
            return Err(Error::InvalidTeacherForcingRate(self.teacher_forcing_rate));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(Error::InvalidLearningRate(self.lr));
        }
        if self.batch_size == 0 || self.num_epochs == 0 {
            return Err(Error::InvalidConfig(format!(
                "batch_size and num_epochs must be positive, got {} and {}",
                self.batch_size, self.num_epochs
            )));
        }
        self.model.validate()?;
        self.window.validate()
    }

    /// Loads a configuration file and validates it. An unknown optimizer
    /// name is rejected here rather than when training starts.
    pub fn load_validated<P: AsRef<std::path::Path>>(path: P) -> error::Result<Self> {
        let config = Self::load(path).map_err(|e| Error::Config(format!("{e:?}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingConfig {
        TrainingConfig::new(Seq2SeqConfig::new(1, 16), WindowConfig::new(12, 4))
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer, OptimizerKind::Adam);
    }

    #[test]
    fn rejects_out_of_range_teacher_forcing_rate() {
        for rate in [-0.1, 1.5, f64::NAN] {
            let err = config().with_teacher_forcing_rate(rate).validate().unwrap_err();
            assert!(matches!(err, Error::InvalidTeacherForcingRate(_)));
        }
        assert!(config().with_teacher_forcing_rate(1.0).validate().is_ok());
        assert!(config().with_teacher_forcing_rate(0.0).validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        let err = config().with_lr(0.0).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidLearningRate(_)));
    }

    #[test]
    fn rejects_splits_without_training_data() {
        let mut config = config();
        config.window = WindowConfig::new(12, 4).with_valid_ratio(0.5).with_test_ratio(0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_optimizer_fails_when_loading() {
        let dir = std::env::temp_dir().join(format!("seq2seq-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("good.json");
        config().with_optimizer(OptimizerKind::RmsProp).save(&path).unwrap();
        let loaded = TrainingConfig::load_validated(&path).unwrap();
        assert_eq!(loaded.optimizer, OptimizerKind::RmsProp);

        let text = std::fs::read_to_string(&path).unwrap().replace("RMSprop", "Adamax");
        let bad = dir.join("bad.json");
        std::fs::write(&bad, text).unwrap();
        assert!(matches!(TrainingConfig::load_validated(&bad), Err(Error::Config(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
