//! DermFuse CLI
//!
//! Entry point for training, evaluating and exporting the skin lesion classifier.
//! Without a subcommand the full pipeline runs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use dermfuse::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use dermfuse::pipeline;
use dermfuse::utils::logging::{init_logging, LogConfig, LogLevel};
use dermfuse::{PipelineConfig, PipelineError, DEFAULT_CONFIG_FILE, VERSION};

/// Two-phase transfer-learning skin lesion classifier
#[derive(Parser, Debug)]
#[command(name = "dermfuse")]
#[command(version)]
#[command(about = "Two-phase transfer-learning skin lesion classification with Burn", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./dermfuse.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose and --quiet
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    overrides: Overrides,

    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that take precedence over the configuration file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Dataset root holding train/, val/ and test/
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Epochs with the backbone frozen
    #[arg(long, global = true)]
    phase1_epochs: Option<usize>,

    /// Fine-tuning epochs
    #[arg(long, global = true)]
    phase2_epochs: Option<usize>,

    /// Samples per batch
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Seed for shuffling and augmentation
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl Overrides {
    fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(root) = &self.data_root {
            config.data = config.data.with_root(root);
        }
        if let Some(epochs) = self.phase1_epochs {
            config.training.phase1_epochs = epochs;
        }
        if let Some(epochs) = self.phase2_epochs {
            config.training.phase2_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.data.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, evaluate and export (the default)
    Run,

    /// Data loading, model build and both training phases
    Train,

    /// Evaluate a saved checkpoint on the test partition
    Evaluate {
        /// Checkpoint to evaluate (defaults to the configured checkpoint)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Quantize the configured checkpoint into the deployment artifact
    Export,

    /// Show the class distribution of every partition
    Stats,

    /// Write a default configuration file
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&log_config(&cli)) {
        eprintln!("{} {}", "Warning: logging disabled:".yellow(), e);
    }

    print_banner();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err.downcast_ref::<PipelineError>() {
                Some(pipeline_err) => {
                    eprintln!(
                        "{} {} ({} error)",
                        "Error:".red().bold(),
                        format!("{:#}", err).red(),
                        pipeline_err.kind()
                    );
                    pipeline_err.exit_code()
                }
                None => {
                    eprintln!("{} {}", "Error:".red().bold(), format!("{:#}", err).red());
                    1
                }
            };
            ExitCode::from(code as u8)
        }
    }
}

fn log_config(cli: &Cli) -> LogConfig {
    let mut config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        config.level = LogLevel::parse(level);
    }
    config
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::InitConfig { output, force } = &command {
        return cmd_init_config(output, *force);
    }

    let config = load_config(cli.config.as_deref(), &cli.overrides)?;
    let device = default_device();
    info!("Using backend: {}", backend_name());

    match command {
        Commands::Run => {
            pipeline::run_pipeline::<TrainingBackend>(&config, &device)?;
        }
        Commands::Train => {
            pipeline::train::<TrainingBackend>(&config, &device)?;
        }
        Commands::Evaluate { checkpoint } => {
            let checkpoint = checkpoint.unwrap_or_else(|| config.output.checkpoint_file());
            pipeline::evaluate_checkpoint::<DefaultBackend>(&config, &checkpoint, &device)?;
        }
        Commands::Export => {
            pipeline::export::<DefaultBackend>(&config, &device)?;
        }
        Commands::Stats => {
            pipeline::dataset_stats(&config)?;
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Explicit file, else `dermfuse.toml` when present, else built-in defaults
fn load_config(explicit: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let config = match explicit {
        Some(path) => PipelineConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            info!("Loading {}", DEFAULT_CONFIG_FILE);
            PipelineConfig::load(DEFAULT_CONFIG_FILE)?
        }
        None => {
            info!("No configuration file; using defaults");
            PipelineConfig::default()
        }
    };

    let config = overrides.apply(config);
    config.validate()?;
    Ok(config)
}

fn cmd_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(PipelineError::Configuration(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        ))
        .into());
    }

    PipelineConfig::default()
        .save_toml(output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("{} {}", "Wrote default configuration to".green(), output.display());
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        format!("DermFuse v{}: skin lesion transfer learning", VERSION)
            .cyan()
            .bold()
    );
}
