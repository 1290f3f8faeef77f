pub mod config;
pub mod data;
pub mod error;
pub mod forcing;
pub mod inference;
pub mod model;
pub mod module;
pub mod optim;
pub mod rnn;
pub mod trainer;
pub mod training;

pub use error::{Error, Result};
