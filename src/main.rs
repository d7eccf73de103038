//! shotclass CLI
//!
//! Prepares the fold table from a frame directory, trains the shot-type
//! classifier on one held-out fold and reports dataset statistics.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use shotclass::backend::{self, Device, HalfTrainingBackend, Precision, TrainingBackend};
use shotclass::utils::logging::init_logging;
use shotclass::{
    assign_folds, index_directory, BackboneKind, DatasetStats, ExperimentConfig, LabelMap,
    SampleTable, ShotDataModule, TrainingDriver,
};

/// Shot-type classification of movie-trailer frames
#[derive(Parser, Debug)]
#[command(name = "shotclass")]
#[command(version)]
#[command(about = "Fine-tune a pretrained backbone on shot-type frames with stratified k-fold CV", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Experiment configuration (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index the frame tree, assign stratified folds and write the table
    Prepare {
        /// Root of the `<root>/<subdir>/<name>_<label>.jpg` tree
        #[arg(short, long)]
        image_root: Option<PathBuf>,

        /// Number of folds
        #[arg(long)]
        folds: Option<usize>,

        /// Shuffle seed for fold assignment
        #[arg(long, conflicts_with = "no_seed")]
        seed: Option<u64>,

        /// Draw a fresh shuffle on every run
        #[arg(long, default_value = "false")]
        no_seed: bool,
    },

    /// Train on every fold except the held-out one
    Train {
        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for all loaders
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Fold used for validation
        #[arg(long)]
        held_out_fold: Option<usize>,

        /// Backbone architecture (efficientnet-b0, resnet18)
        #[arg(long)]
        backbone: Option<BackboneKind>,

        /// Pretrained backbone weights
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Arithmetic precision (full, half)
        #[arg(long)]
        precision: Option<Precision>,

        /// Accelerator index
        #[arg(long)]
        device: Option<usize>,

        /// Table evaluated once after training
        #[arg(long)]
        test_table: Option<PathBuf>,

        /// Final checkpoint file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show label distribution overall and per fold
    Stats,

    /// Write the default configuration to a file
    InitConfig {
        /// Output path
        #[arg(default_value = "shotclass.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => ExperimentConfig::default(),
    };

    match cli.command {
        Commands::Prepare {
            image_root,
            folds,
            seed,
            no_seed,
        } => {
            if let Some(image_root) = image_root {
                config.data.image_root = image_root;
            }
            if let Some(folds) = folds {
                config.folds.num_folds = folds;
            }
            if seed.is_some() {
                config.folds.seed = seed;
            }
            if no_seed {
                config.folds.seed = None;
            }
            config.validate()?;
            cmd_prepare(&config)?;
        }

        Commands::Train {
            epochs,
            batch_size,
            held_out_fold,
            backbone,
            weights,
            precision,
            device,
            test_table,
            output,
        } => {
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.data.batch_size = batch_size;
            }
            if let Some(fold) = held_out_fold {
                config.data.held_out_fold = fold;
            }
            if let Some(backbone) = backbone {
                config.model.backbone = backbone;
            }
            if weights.is_some() {
                config.model.pretrained_weights = weights;
            }
            if let Some(precision) = precision {
                config.training.precision = precision;
            }
            if let Some(device) = device {
                config.training.device_index = device;
            }
            if test_table.is_some() {
                config.data.test_table_path = test_table;
            }
            if let Some(output) = output {
                config.training.checkpoint_path = output;
            }
            config.validate()?;
            cmd_train(&config)?;
        }

        Commands::Stats => {
            cmd_stats(&config)?;
        }

        Commands::InitConfig { output } => {
            config.save(&output)?;
            println!("{} {:?}", "Configuration written to".green(), output);
        }
    }

    Ok(())
}

fn cmd_prepare(config: &ExperimentConfig) -> Result<()> {
    println!("{}", "Indexing Frames...".cyan().bold());
    let indexed = index_directory(&config.data.image_root)?;
    indexed.stats().print();

    println!("{}", "Assigning Folds...".cyan().bold());
    match config.folds.seed {
        Some(seed) => info!("Fold shuffle seed: {}", seed),
        None => warn!("No fold seed configured, fold membership will differ between runs"),
    }
    let table = assign_folds(&indexed.table, &config.folds)?;

    table.write_csv(&config.data.table_path)?;
    indexed.label_map.save(&config.data.label_map_path)?;

    DatasetStats::from_table(&table, &indexed.label_map).print();

    println!();
    println!("  Table:     {:?}", config.data.table_path);
    println!("  Label map: {:?}", config.data.label_map_path);
    Ok(())
}

fn cmd_train(config: &ExperimentConfig) -> Result<()> {
    let label_map = if config.data.label_map_path.exists() {
        Some(LabelMap::load(&config.data.label_map_path)?)
    } else {
        warn!(
            "Label map {:?} not found, class count is not checked",
            config.data.label_map_path
        );
        None
    };

    let mut data = ShotDataModule::new(config.data.clone());
    data.setup()?;

    let device = backend::device_for_index(config.training.device_index);
    info!("Backend: {} ({:?})", backend::backend_name(), device);

    let requested = config.training.precision;
    let precision = requested.effective();
    if precision != requested {
        warn!(
            "{} precision is not supported by the {} backend, training in {}",
            requested,
            backend::backend_name(),
            precision
        );
    }

    match precision {
        Precision::Full => run_training::<TrainingBackend>(config, label_map.as_ref(), &data, &device),
        Precision::Half => run_training::<HalfTrainingBackend>(config, label_map.as_ref(), &data, &device),
    }
}

fn run_training<B>(
    config: &ExperimentConfig,
    label_map: Option<&LabelMap>,
    data: &ShotDataModule,
    device: &Device,
) -> Result<()>
where
    B: AutodiffBackend<Device = Device>,
{
    let mut driver = TrainingDriver::new(config);
    if let Some(label_map) = label_map {
        driver = driver.with_label_map(label_map);
    }

    let outcome = driver.run::<B>(data, device)?;
    if let Some(last) = outcome.epochs.last() {
        println!(
            "  Final epoch: train acc {:.2}%{}",
            last.train_acc * 100.0,
            last.val_acc
                .map(|acc| format!(", val acc {:.2}%", acc * 100.0))
                .unwrap_or_default()
        );
    }
    if let Some(test) = &outcome.test_metrics {
        for (name, value) in test {
            println!("  {}: {:.4}", name, value);
        }
    }
    Ok(())
}

fn cmd_stats(config: &ExperimentConfig) -> Result<()> {
    let table = SampleTable::read_csv(&config.data.table_path)?;
    let label_map = LabelMap::load(&config.data.label_map_path)
        .with_context(|| format!("Failed to load label map {:?}", config.data.label_map_path))?;

    DatasetStats::from_table(&table, &label_map).print();
    Ok(())
}
