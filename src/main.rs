//! CropCare CLI
//!
//! Runs single-image predictions and checks a model deployment without
//! starting the HTTP server.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use cropcare::backend::backend_name;
use cropcare::inference::service::PredictionRequest;
use cropcare::utils::format_millis;
use cropcare::utils::logging::{init_logging, LogConfig};
use cropcare::{PredictionService, ServiceConfig};

/// CropCare leaf disease inference
///
/// Classifies a leaf photo into one of the supported crop diseases using a
/// Burn CNN on the CPU.
#[derive(Parser, Debug)]
#[command(name = "cropcare")]
#[command(version)]
#[command(about = "Leaf disease inference with Burn", long_about = None)]
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
    /// Classify a single leaf image and print the result as JSON
    Infer {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Crop shown in the photo (pepper, potato, tomato)
        #[arg(short = 't', long)]
        crop_type: Option<String>,

        /// Growth stage, echoed back in the result
        #[arg(long)]
        crop_stage: Option<String>,

        #[command(flatten)]
        paths: PathArgs,
    },

    /// Load the model and labels and run the startup validation
    Check {
        #[command(flatten)]
        paths: PathArgs,
    },
}

#[derive(Args, Debug)]
struct PathArgs {
    /// TOML configuration file
    #[arg(short, long, env = "CROPCARE_CONFIG", default_value = "config/cropcare.toml")]
    config: PathBuf,

    /// Classifier artifact, overrides `model.path`
    #[arg(short, long, env = "CROPCARE_MODEL")]
    model: Option<PathBuf>,

    /// Class index JSON, overrides `labels.class_index_path`
    #[arg(long, env = "CROPCARE_CLASS_INDEX")]
    class_index: Option<PathBuf>,
}

impl PathArgs {
    fn resolve(&self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        if let Some(model) = &self.model {
            config.model.path = model.clone();
        }
        if let Some(class_index) = &self.class_index {
            config.labels.class_index_path = class_index.clone();
        }
        Ok(config)
    }
}

impl Commands {
    fn paths(&self) -> &PathArgs {
        match self {
            Commands::Infer { paths, .. } | Commands::Check { paths } => paths,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = cli.command.paths();
    let config = paths.resolve()?;

    let log_config = config.logging.log_config(LogConfig::default(), cli.verbose);
    let _ = init_logging(&log_config);

    if !paths.config.exists() {
        warn!("Config file {:?} not found, using defaults", paths.config);
    }

    print_banner();

    match cli.command {
        Commands::Infer {
            input,
            crop_type,
            crop_stage,
            paths: _,
        } => {
            cmd_infer(&input, crop_type, crop_stage, &config)?;
        }

        Commands::Check { .. } => {
            cmd_check(&config)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------+
 |   CropCare Leaf Disease Inference                |
 |   Burn + Rust, CPU backend                       |
 +--------------------------------------------------+
  "#
        .green()
    );
}

fn load_service(config: &ServiceConfig) -> Result<PredictionService> {
    println!("{}", "Loading model...".cyan());
    PredictionService::from_config(config).with_context(|| {
        format!(
            "failed to start the prediction service with model {}",
            config.model.path.display()
        )
    })
}

fn cmd_infer(
    input: &Path,
    crop_type: Option<String>,
    crop_stage: Option<String>,
    config: &ServiceConfig,
) -> Result<()> {
    info!("Running inference");
    info!("  Input: {:?}", input);
    info!("  Model: {:?}", config.model.path);

    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  Input:     {}", input.display());
    println!("  Model:     {}", config.model.path.display());
    println!("  Crop type: {}", crop_type.as_deref().unwrap_or("(any)"));
    println!("  Backend:   {}", backend_name());
    println!();

    let mut request = PredictionRequest::from_path(input)
        .with_context(|| format!("failed to read image {}", input.display()))?;
    request.crop_type = crop_type;
    request.crop_stage = crop_stage;

    let service = load_service(config)?;

    let start = std::time::Instant::now();
    let result = service
        .handle(&request)
        .with_context(|| format!("prediction failed for {}", input.display()))?;
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;

    println!(
        "{} {} ({:.1}%) in {}",
        "Prediction:".green().bold(),
        result.label.bold(),
        result.confidence * 100.0,
        format_millis(elapsed)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn cmd_check(config: &ServiceConfig) -> Result<()> {
    let service = load_service(config)?;

    println!("{}", "Deployment OK".green().bold());
    println!("  Model:       {}", service.runtime().describe());
    println!("  Input shape: {:?}", service.runtime().input_shape());
    println!(
        "  Labels:      {} from {}",
        service.class_map().len(),
        config.labels.class_index_path.display()
    );
    if service.class_map().is_empty() {
        println!(
            "  {} no class index loaded; labels will be \"Unknown\"",
            "Warning:".yellow()
        );
    }
    println!("  Crop groups:");
    for (crop, ids) in service.crop_groups().iter() {
        let labels: Vec<&str> = ids.iter().map(|&id| service.class_map().lookup(id)).collect();
        println!("    {:<8} {:?}", crop, labels);
    }

    Ok(())
}
