//! shlight CLI
//!
//! Entry point for training the spherical-harmonic lighting regressor and for
//! searching its training hyperparameters.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use shlight::backend::{backend_name, default_device, TrainingBackend};
use shlight::training::{build_dataloaders, SearchConfig, TrainingConfig};
use shlight::utils::logging::{init_logging, LogConfig};
use shlight::{
    split_indices, HyperparameterSearch, PairedSampleStore, ShRegressorConfig, StoreConfig,
    Trainer,
};

/// Spherical-harmonic lighting coefficient regression
///
/// Trains a CNN that maps an input image to its 27 spherical-harmonic lighting
/// coefficients, with reproducible splits, atomic checkpointing and random
/// hyperparameter search, built on the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "shlight")]
#[command(version)]
#[command(about = "Spherical-harmonic lighting regression with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the regressor on a paired image/coefficient dataset
    Train {
        /// Directory holding the input images
        #[arg(short, long, default_value = "data/pngs")]
        image_dir: String,

        /// Directory holding the coefficient files
        #[arg(short, long, default_value = "data/sh")]
        label_dir: String,

        /// Number of training epochs
        #[arg(short, long, default_value = "10")]
        epochs: usize,

        /// Batch size for training and validation
        #[arg(short, long, default_value = "16")]
        batch_size: usize,

        /// Learning rate
        #[arg(long, default_value = "4.5127039469197727e-4")]
        learning_rate: f64,

        /// Weight decay (L2 regularization)
        #[arg(long, default_value = "5.71817601139671e-4")]
        weight_decay: f64,

        /// Fraction of samples assigned to the training split (0.0-1.0)
        #[arg(long, default_value = "0.98")]
        train_fraction: f64,

        /// Output directory for checkpoints and the run configuration
        #[arg(short, long, default_value = "output")]
        output_dir: String,

        /// Random seed for split assignment and shuffling
        #[arg(long, default_value = "1234")]
        seed: u64,

        /// Number of data loading workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Resume from the most recent checkpoint in the output directory
        #[arg(long, default_value = "false")]
        resume: bool,

        /// Optional wall-clock budget in seconds, checked at epoch boundaries
        #[arg(long)]
        max_seconds: Option<u64>,
    },

    /// Search learning rate and weight decay over shortened training runs
    Search {
        /// Directory holding the input images
        #[arg(short, long, default_value = "data/pngs")]
        image_dir: String,

        /// Directory holding the coefficient files
        #[arg(short, long, default_value = "data/sh")]
        label_dir: String,

        /// Number of trials
        #[arg(short, long, default_value = "50")]
        trials: usize,

        /// Epochs per shortened trial run
        #[arg(long, default_value = "4")]
        epochs_per_trial: usize,

        /// Batch size for trial runs
        #[arg(short, long, default_value = "16")]
        batch_size: usize,

        /// Output directory for trial checkpoints and the results report
        #[arg(short, long, default_value = "output/search")]
        output_dir: String,

        /// Seed for the sampling stream, split and shuffling
        #[arg(long, default_value = "1234")]
        seed: u64,

        /// Number of data loading workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Optional wall-clock budget per trial in seconds
        #[arg(long)]
        max_trial_seconds: Option<u64>,
    },

    /// Show dataset statistics for a paired image/coefficient directory
    Stats {
        /// Directory holding the input images
        #[arg(short, long, default_value = "data/pngs")]
        image_dir: String,

        /// Directory holding the coefficient files
        #[arg(short, long, default_value = "data/sh")]
        label_dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            image_dir,
            label_dir,
            epochs,
            batch_size,
            learning_rate,
            weight_decay,
            train_fraction,
            output_dir,
            seed,
            workers,
            resume,
            max_seconds,
        } => {
            let config = TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                weight_decay,
                train_fraction,
                seed,
                num_workers: workers,
                checkpoint_dir: Path::new(&output_dir)
                    .join("checkpoints")
                    .to_string_lossy()
                    .into_owned(),
                max_seconds,
                ..Default::default()
            };
            cmd_train(&image_dir, &label_dir, config, &output_dir, resume)?;
        }

        Commands::Search {
            image_dir,
            label_dir,
            trials,
            epochs_per_trial,
            batch_size,
            output_dir,
            seed,
            workers,
            max_trial_seconds,
        } => {
            let config = SearchConfig {
                trials,
                epochs_per_trial,
                seed,
                max_trial_seconds,
                training: TrainingConfig {
                    batch_size,
                    seed,
                    num_workers: workers,
                    checkpoint_dir: Path::new(&output_dir)
                        .join("trials")
                        .to_string_lossy()
                        .into_owned(),
                    ..Default::default()
                },
                ..Default::default()
            };
            cmd_search(&image_dir, &label_dir, config, &output_dir)?;
        }

        Commands::Stats {
            image_dir,
            label_dir,
        } => {
            cmd_stats(&image_dir, &label_dir)?;
        }
    }

    Ok(())
}

fn open_store(image_dir: &str, label_dir: &str) -> Result<Arc<PairedSampleStore>> {
    let store = PairedSampleStore::open(image_dir, label_dir, StoreConfig::default())?;
    if store.is_empty() {
        anyhow::bail!(
            "no usable image/coefficient pairs found in {} / {}",
            image_dir,
            label_dir
        );
    }
    Ok(Arc::new(store))
}

fn cmd_train(
    image_dir: &str,
    label_dir: &str,
    config: TrainingConfig,
    output_dir: &str,
    resume: bool,
) -> Result<()> {
    config.validate()?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Images:        {}", image_dir);
    println!("  Coefficients:  {}", label_dir);
    println!("  Epochs:        {}", config.epochs);
    println!("  Batch size:    {}", config.batch_size);
    println!("  Learning rate: {:.3e}", config.learning_rate);
    println!("  Weight decay:  {:.3e}", config.weight_decay);
    println!("  Seed:          {}", config.seed);
    println!("  Backend:       {}", backend_name());
    println!();

    let store = open_store(image_dir, label_dir)?;
    info!(
        "Dataset: {} pairs ({} images skipped without labels)",
        store.len(),
        store.skipped()
    );

    let split = split_indices(store.len(), config.train_fraction, config.seed)?;
    let device = default_device();
    let (train_loader, val_loader) =
        build_dataloaders::<TrainingBackend>(store, &split, &config, &device);

    std::fs::create_dir_all(output_dir)?;
    config.save(&Path::new(output_dir).join("training.json"))?;

    let model = ShRegressorConfig::new().init::<TrainingBackend>(&device);
    let mut trainer = Trainer::new(model, config, device)?;

    if resume {
        match trainer.resume_latest()? {
            Some(step) => println!("{} step {}", "Resumed from".green(), step),
            None => println!("{}", "No usable checkpoint found, starting fresh".yellow()),
        }
    }

    let report = match trainer.fit(train_loader, val_loader) {
        Ok(report) => report,
        Err(e @ shlight::ShlightError::NumericDivergence { .. }) => {
            println!();
            println!("{} {}", "Training failed:".red().bold(), e);
            if let Some((step, path)) = trainer.checkpoints().latest()? {
                println!(
                    "  Last usable checkpoint: step {} at {}",
                    step,
                    path.display()
                );
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("{}", "Training Summary:".green().bold());
    println!("  Epochs run:      {}", report.epochs_run);
    println!("  Global step:     {}", report.global_step);
    println!("  Final loss:      {:.6}", report.final_train_loss);
    println!("  Best val loss:   {:.6}", report.best_val_loss);
    println!("  Skipped updates: {}", report.skipped_updates);
    if report.interrupted {
        println!("  {}", "Run cut short by the wall-clock budget".yellow());
    }

    Ok(())
}

fn cmd_search(
    image_dir: &str,
    label_dir: &str,
    config: SearchConfig,
    output_dir: &str,
) -> Result<()> {
    println!("{}", "Search Configuration:".cyan().bold());
    println!("  Images:           {}", image_dir);
    println!("  Coefficients:     {}", label_dir);
    println!("  Trials:           {}", config.trials);
    println!("  Epochs per trial: {}", config.epochs_per_trial);
    println!("  Seed:             {}", config.seed);
    println!("  Backend:          {}", backend_name());
    println!();

    let store = open_store(image_dir, label_dir)?;
    let device = default_device();

    std::fs::create_dir_all(output_dir)?;
    let mut search = HyperparameterSearch::new(config)?;
    let best = search.run::<TrainingBackend>(store, &ShRegressorConfig::new(), device)?;
    search.save_report(&Path::new(output_dir).join("trials.json"))?;

    println!();
    println!("{}", "Best Trial:".green().bold());
    println!("  Trial:         {}", best.id);
    println!("  Learning rate: {:.6e}", best.learning_rate);
    println!("  Weight decay:  {:.6e}", best.weight_decay);
    println!("  Objective:     {:.6}", best.objective);

    Ok(())
}

fn cmd_stats(image_dir: &str, label_dir: &str) -> Result<()> {
    let store = PairedSampleStore::open(image_dir, label_dir, StoreConfig::default())?;

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Paired samples:  {}", store.len());
    println!("  Skipped images:  {}", store.skipped());
    println!(
        "  Input size:      {}x{}",
        store.preprocessor().width,
        store.preprocessor().height
    );
    println!("  Coefficients:    {}", store.expected_coefficients());

    if store.skipped() > 0 {
        println!();
        println!(
            "{} {} image(s) have no matching coefficient file",
            "Warning:".yellow(),
            store.skipped()
        );
    }

    Ok(())
}
