use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown optimizer `{0}`, expected one of Adam, AdamW, SGD, RMSprop, Adagrad")]
    UnknownOptimizer(String),

    #[error("teacher forcing rate must lie in [0, 1], got {0}")]
    InvalidTeacherForcingRate(f64),

    #[error("learning rate must be positive, got {0}")]
    InvalidLearningRate(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no {0} data loader configured")]
    MissingDataLoader(&'static str),

    #[error("series of length {len} is too short, at least {required} steps are needed")]
    SeriesTooShort { len: usize, required: usize },

    #[error("column `{0}` not found in csv header")]
    MissingColumn(String),

    #[error("row {row}, column `{column}`: {source}")]
    Parse {
        row: usize,
        column: String,
        source: std::num::ParseFloatError,
    },

    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error("failed to record model: {0}")]
    Recorder(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
