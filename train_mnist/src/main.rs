use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use train_mnist::backend::{self, Backend, TrainBackend};
use train_mnist::experiment::{self, ExperimentOptions, Preset};
use train_mnist::graph::create_training_history_graph;
use training::{HISTORY_FILE, TrainingHistory};

#[derive(clap::Parser)]
#[command(name = "train_mnist", about = "MNIST and Fashion-MNIST classifiers", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
#[command(about = "MNIST neural network operations")]
enum Command {
    /// Train a model, evaluate it on the test set and save it
    Train(TrainArgs),
    /// Test a saved model on the test set of its dataset
    Test {
        /// Directory written by `train`
        #[arg(long)]
        model: PathBuf,
        /// Directory holding the IDX files
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 256)]
        batch_size: usize,
    },
    /// Create an SVG graph of training history accuracies and losses
    Graph {
        /// Directory written by `train`
        #[arg(long)]
        model: PathBuf,
        /// Defaults to `<model>/training_history.svg`
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the compute backend and device
    Devices,
}

#[derive(clap::Args)]
struct TrainArgs {
    #[arg(long, value_enum)]
    preset: Preset,
    /// Directory holding the IDX files, defaults to `$MNIST_DATA_DIR/<dataset>` or `data/<dataset>`
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Download missing dataset files
    #[arg(long)]
    download: bool,
    #[arg(long)]
    epochs: Option<u32>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many epochs without improvement
    #[arg(long)]
    early_stopping_patience: Option<u32>,
    /// Standardize pixels with the training mean and standard deviation
    #[arg(long)]
    standardize: bool,
    /// JSON layer description replacing the preset's model
    #[arg(long)]
    model_config: Option<PathBuf>,
    /// Defaults to `models/<preset>`
    #[arg(long)]
    output: Option<PathBuf>,
    /// Use only the first N samples of each split
    #[arg(long)]
    limit: Option<usize>,
    /// Number of misclassified test images to save
    #[arg(long)]
    misclassified: Option<usize>,
}

impl From<TrainArgs> for ExperimentOptions {
    fn from(args: TrainArgs) -> Self {
        Self {
            preset: args.preset,
            data_dir: args.data_dir,
            download: args.download,
            epochs: args.epochs,
            batch_size: args.batch_size,
            learning_rate: args.learning_rate,
            seed: args.seed,
            early_stopping_patience: args.early_stopping_patience,
            standardize: args.standardize,
            model_config: args.model_config,
            output: args.output,
            limit: args.limit,
            misclassified: args.misclassified,
        }
    }
}

fn graph(model: PathBuf, output: Option<PathBuf>) -> Result<()> {
    println!("Loading training history...");
    let history_path = model.join(HISTORY_FILE);
    let history = TrainingHistory::load(&history_path)
        .with_context(|| format!("Failed to load {}", history_path.display()))?;

    let output_path = output.unwrap_or_else(|| model.join("training_history.svg"));
    create_training_history_graph(&history, &output_path)?;
    println!("Training history graph saved to {}", output_path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Train(train_args) => {
            let options = ExperimentOptions::from(train_args);
            experiment::run::<TrainBackend>(&options, backend::device())
                .context("Failed to train network")?;
        }
        Command::Test {
            model,
            data_dir,
            batch_size,
        } => {
            let report =
                experiment::test::<Backend>(&model, data_dir.as_deref(), batch_size, backend::device())
                    .context("Failed to test network")?;
            report.print();
        }
        Command::Graph { model, output } => {
            graph(model, output).context("Failed to create training history graph")?
        }
        Command::Devices => println!("{}", backend::describe()),
    }

    Ok(())
}
