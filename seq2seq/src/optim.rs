use std::{fmt, str::FromStr};

use burn::{
    module::AutodiffModule,
    optim::{
        AdaGradConfig, AdamConfig, AdamWConfig, GradientsParams, Optimizer, RmsPropConfig,
        SgdConfig,
    },
    tensor::backend::AutodiffBackend,
    LearningRate,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Optimizers a training configuration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
    RmsProp,
    AdaGrad,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 5] = [
        OptimizerKind::Adam,
        OptimizerKind::AdamW,
        OptimizerKind::Sgd,
        OptimizerKind::RmsProp,
        OptimizerKind::AdaGrad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "Adam",
            OptimizerKind::AdamW => "AdamW",
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::RmsProp => "RMSprop",
            OptimizerKind::AdaGrad => "Adagrad",
        }
    }

    /// Builds a fresh optimizer with default hyperparameters for this kind.
    pub fn init<B, M>(&self) -> Box<dyn ModuleOptimizer<M, B>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + 'static,
    {
        match self {
            OptimizerKind::Adam => Box::new(AdamConfig::new().init::<B, M>()),
            OptimizerKind::AdamW => Box::new(AdamWConfig::new().init::<B, M>()),
            OptimizerKind::Sgd => Box::new(SgdConfig::new().init::<B, M>()),
            OptimizerKind::RmsProp => Box::new(RmsPropConfig::new().init::<B, M>()),
            OptimizerKind::AdaGrad => Box::new(AdaGradConfig::new().init::<B, M>()),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        OptimizerKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::UnknownOptimizer(name.to_string()))
    }
}

impl TryFrom<String> for OptimizerKind {
    type Error = Error;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<OptimizerKind> for String {
    fn from(kind: OptimizerKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Object-safe view of [`Optimizer`], so optimizers of different kinds can
/// sit behind the same box.
pub trait ModuleOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn step(&mut self, lr: LearningRate, module: M, grads: GradientsParams) -> M;
}

impl<M, B, O> ModuleOptimizer<M, B> for O
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: Optimizer<M, B>,
{
    fn step(&mut self, lr: LearningRate, module: M, grads: GradientsParams) -> M {
        Optimizer::step(self, lr, module, grads)
    }
}

/// An optimizer bound to the learning rate it was configured with.
pub struct ConfiguredOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    kind: OptimizerKind,
    lr: LearningRate,
    inner: Box<dyn ModuleOptimizer<M, B>>,
}

impl<M, B> ConfiguredOptimizer<M, B>
where
    M: AutodiffModule<B> + 'static,
    B: AutodiffBackend,
{
    pub fn new(kind: OptimizerKind, lr: LearningRate) -> Self {
        Self {
            kind,
            lr,
            inner: kind.init::<B, M>(),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn lr(&self) -> LearningRate {
        self.lr
    }

    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        self.inner.step(self.lr, module, grads)
    }
}

impl<M, B> fmt::Debug for ConfiguredOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredOptimizer")
            .field("kind", &self.kind)
            .field("lr", &self.lr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("sgd".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert_eq!("adagrad".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdaGrad);
        assert_eq!(" AdamW ".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
    }

    #[test]
    fn unknown_name_is_a_lookup_failure() {
        let err = "Adamax".parse::<OptimizerKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownOptimizer(name) if name == "Adamax"));
    }

    #[test]
    fn names_round_trip_through_strings() {
        for kind in OptimizerKind::ALL {
            assert_eq!(String::from(kind).parse::<OptimizerKind>().unwrap(), kind);
        }
    }
}
