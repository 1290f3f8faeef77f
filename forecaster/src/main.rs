use std::path::PathBuf;

use anyhow::Context;
use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use seq2seq::{
    config::{TrainingConfig, WindowConfig},
    data::load_series,
    inference::Forecaster,
    model::Seq2SeqConfig,
    optim::OptimizerKind,
    rnn::RnnKind,
};

type MyBackend = NdArray;
type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Debug, Parser)]
#[clap(about = "Sequence-to-sequence RNN forecaster for time series")]
struct Opt {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train a model on a csv series and write its artifacts
    Train(TrainArgs),
    /// Score saved artifacts on every window of a csv series
    Evaluate(SeriesArgs),
    /// Forecast the steps following the end of a csv series
    Forecast(ForecastArgs),
}

#[derive(Debug, Args)]
struct SeriesArgs {
    /// Csv file with a header row
    #[clap(short, long)]
    data: PathBuf,
    /// Columns forming the series, in feature order
    #[clap(short, long = "column", required = true)]
    columns: Vec<String>,
    #[clap(short, long, default_value = "./artifacts")]
    artifact_dir: String,
}

#[derive(Debug, Args)]
struct TrainArgs {
    #[clap(flatten)]
    series: SeriesArgs,
    /// Start from a saved training configuration instead of the defaults
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(long)]
    enc_len: Option<usize>,
    #[clap(long)]
    dec_len: Option<usize>,
    #[clap(long)]
    hidden_size: Option<usize>,
    #[clap(long)]
    n_layers: Option<usize>,
    #[clap(long)]
    rnn_type: Option<RnnKind>,
    #[clap(long)]
    optimizer: Option<OptimizerKind>,
    #[clap(long)]
    lr: Option<f64>,
    #[clap(long)]
    teacher_forcing_rate: Option<f64>,
    #[clap(long)]
    epochs: Option<usize>,
    #[clap(long)]
    batch_size: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct ForecastArgs {
    #[clap(flatten)]
    series: SeriesArgs,
    #[clap(short = 'n', long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    steps: u64,
}

impl TrainArgs {
    fn config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|e| anyhow::anyhow!("{e:?}"))
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => TrainingConfig::new(
                Seq2SeqConfig::new(self.series.columns.len(), 32),
                WindowConfig::new(24, 6),
            ),
        };

        if let Some(enc_len) = self.enc_len {
            config.window.enc_len = enc_len;
        }
        if let Some(dec_len) = self.dec_len {
            config.window.dec_len = dec_len;
        }
        if let Some(hidden_size) = self.hidden_size {
            config.model.hidden_size = hidden_size;
        }
        if let Some(n_layers) = self.n_layers {
            config.model.n_layers = n_layers;
        }
        if let Some(rnn_type) = self.rnn_type {
            config.model.rnn_type = rnn_type;
        }
        if let Some(optimizer) = self.optimizer {
            config.optimizer = optimizer;
        }
        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(rate) = self.teacher_forcing_rate {
            config.teacher_forcing_rate = rate;
        }
        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn train(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    let series = load_series(&args.series.data, &args.series.columns)
        .with_context(|| format!("failed to load {}", args.series.data.display()))?;
    info!("Loaded {} steps from {}", series.len(), args.series.data.display());

    let device = NdArrayDevice::default();
    let report = seq2seq::training::train::<MyAutodiffBackend>(
        &args.series.artifact_dir,
        config,
        &series,
        device,
    )?;

    match (report.history.best_val_loss(), report.test_loss) {
        (Some(val), Some(test)) => info!("Best val_loss = {val:.6}, test_loss = {test:.6}"),
        _ => warn!("No validation or test loss was recorded"),
    }
    Ok(())
}

fn evaluate(args: SeriesArgs) -> anyhow::Result<()> {
    let series = load_series(&args.data, &args.columns)
        .with_context(|| format!("failed to load {}", args.data.display()))?;

    let device = NdArrayDevice::default();
    let log = seq2seq::training::evaluate::<MyAutodiffBackend>(&args.artifact_dir, &series, device)
        .with_context(|| format!("failed to evaluate {}", args.artifact_dir))?;

    match log.val_loss() {
        Some(loss) => println!("val_loss,{loss}"),
        None => warn!("No loss was recorded"),
    }
    Ok(())
}

fn forecast(args: ForecastArgs) -> anyhow::Result<()> {
    let series = load_series(&args.series.data, &args.series.columns)
        .with_context(|| format!("failed to load {}", args.series.data.display()))?;

    let device = NdArrayDevice::default();
    let forecaster = Forecaster::<MyBackend>::load(&args.series.artifact_dir, device)
        .with_context(|| format!("failed to load model from {}", args.series.artifact_dir))?;
    let predictions = forecaster.forecast(&series, args.steps as usize)?;

    println!("{}", args.series.columns.join(","));
    for row in predictions {
        let row: Vec<String> = row.iter().map(f32::to_string).collect();
        println!("{}", row.join(","));
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();

    env_logger::init();

    match opt.command {
        Command::Train(args) => train(args),
        Command::Evaluate(args) => evaluate(args),
        Command::Forecast(args) => forecast(args),
    }
}
