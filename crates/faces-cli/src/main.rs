use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faces_core::{DetectRequest, Detached, FeatureExtractionPolicy, JsonTree, OnnxBackend};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "hera-faces", about = "Face, eye, eyebrow and lip rectangles from a photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces and feature rectangles in one photo
    Detect {
        /// Photo to analyze
        photo: PathBuf,
        /// Face detector config (TOML)
        #[arg(long)]
        face_config: Option<PathBuf>,
        /// SCRFD face detector weights (ONNX)
        #[arg(long)]
        face_weights: Option<PathBuf>,
        /// 68-point landmark model (ONNX)
        #[arg(long)]
        landmark_model: Option<PathBuf>,
        /// Feature policy: "eyes" or "brows-and-lips"
        #[arg(short, long, conflicts_with = "policy_file")]
        policy: Option<String>,
        /// JSON file with a custom feature policy
        #[arg(long)]
        policy_file: Option<PathBuf>,
        /// Print the nested tuple/list wire shape instead of named fields
        #[arg(long)]
        wire: bool,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Show the landmark ranges of a feature policy
    Policy {
        /// Policy name
        #[arg(default_value = FeatureExtractionPolicy::EYES)]
        name: String,
    },
}

fn load_policy(name: Option<String>, file: Option<PathBuf>, config: &Config) -> Result<FeatureExtractionPolicy> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading policy file {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("parsing policy file {}", path.display()));
    }
    let name = name.unwrap_or_else(|| config.policy.clone());
    Ok(name.parse()?)
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Detect {
            photo,
            face_config,
            face_weights,
            landmark_model,
            policy,
            policy_file,
            wire,
            pretty,
        } => {
            let policy = load_policy(policy, policy_file, &config)?;
            let request = DetectRequest::new(
                photo,
                face_config.unwrap_or_else(|| config.face_config_path()),
                face_weights.unwrap_or_else(|| config.face_weights_path()),
                landmark_model.unwrap_or_else(|| config.landmark_model_path()),
            );
            tracing::debug!(?request, %policy, "running detection");

            let result = faces_core::detect(&Detached, &OnnxBackend, request, &policy)?;
            let value = if wire {
                match result.marshal(&mut JsonTree) {
                    Ok(value) => value,
                    Err(never) => match never {},
                }
            } else {
                serde_json::to_value(&result)?
            };
            print_json(&value, pretty)?;
        }
        Commands::Policy { name } => {
            let policy: FeatureExtractionPolicy = name.parse()?;
            print_json(&serde_json::to_value(&policy)?, true)?;
        }
    }

    Ok(())
}
