//! Property valuation CLI
//!
//! Trains price models from listing CSVs, manages stored artifacts and
//! requests estimates, either locally or from a running server.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{models, predict, train};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use valuation_lib::ArtifactStore;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_MODEL_NAME: &str = "property_valuation_model";

/// Property valuation CLI
#[derive(Parser)]
#[command(name = "valuation")]
#[command(author, version, about = "CLI for the Property Valuation model", long_about = None)]
pub struct Cli {
    /// API endpoint URL
    #[arg(long, env = "VALUATION_API_URL", global = true)]
    pub api_url: Option<String>,

    /// API key sent as X-API-Key
    #[arg(long, env = "VALUATION_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct StoreArgs {
    /// Artifact directory
    #[arg(long, env = "VALUATION_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Artifact file name prefix
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model from listing CSVs and activate it
    Train {
        /// Training CSV
        #[arg(long)]
        train: PathBuf,

        /// Holdout CSV (a random split of the training rows if omitted)
        #[arg(long)]
        test: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,

        /// Training configuration file (toml, yaml or json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Refuse to save a model whose holdout MAPE exceeds this value
        #[arg(long)]
        mape_gate: Option<f64>,

        /// Random seed for the holdout split and row subsampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Estimate the price of a listing
    Predict {
        /// Property type (apartment, house, studio)
        #[arg(long = "type")]
        property_type: String,

        #[arg(long)]
        sector: String,

        /// Usable area in square metres
        #[arg(long)]
        net_usable_area: f64,

        /// Total area in square metres
        #[arg(long)]
        net_area: f64,

        #[arg(long)]
        n_rooms: u32,

        #[arg(long)]
        n_bathroom: u32,

        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,

        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,

        /// Predict with the current artifact in this directory instead of the API
        #[arg(long)]
        local: Option<PathBuf>,

        /// Artifact file name prefix for --local
        #[arg(long, default_value = DEFAULT_MODEL_NAME)]
        model_name: String,
    },

    /// Manage stored model artifacts
    #[command(subcommand)]
    Models(ModelsCommands),
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List stored artifacts
    List {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Show an artifact's metadata
    Inspect {
        /// Version to inspect (the current one if omitted)
        version: Option<String>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Make an existing version the current one
    Activate {
        version: String,

        #[command(flatten)]
        store: StoreArgs,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = config::Config::load()?;
    let open_store = |args: StoreArgs| {
        let dir = args
            .model_dir
            .or_else(|| settings.model_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
        ArtifactStore::open(dir, args.model_name)
    };

    match cli.command {
        Commands::Train {
            train: train_csv,
            test,
            store,
            config,
            mape_gate,
            seed,
        } => {
            let store = open_store(store);
            let options = train::TrainOptions {
                train: train_csv,
                test,
                model_dir: store.config().model_dir.clone(),
                model_name: store.config().model_name.clone(),
                config,
                mape_gate,
                seed,
            };
            train::train(options, cli.format).await?;
        }
        Commands::Predict {
            property_type,
            sector,
            net_usable_area,
            net_area,
            n_rooms,
            n_bathroom,
            latitude,
            longitude,
            local,
            model_name,
        } => {
            let listing = predict::Listing {
                property_type,
                sector,
                net_usable_area,
                net_area,
                n_rooms,
                n_bathroom,
                latitude,
                longitude,
            };
            match local {
                Some(model_dir) => {
                    let target = predict::Target::Local {
                        model_dir,
                        model_name,
                    };
                    predict::predict(&listing, target, cli.format).await?;
                }
                None => {
                    let api_url = cli
                        .api_url
                        .or(settings.api_url.clone())
                        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
                    let client =
                        client::ApiClient::new(&api_url, cli.api_key.or(settings.api_key.clone()))?;
                    predict::predict(&listing, predict::Target::Remote(&client), cli.format).await?;
                }
            }
        }
        Commands::Models(models_cmd) => match models_cmd {
            ModelsCommands::List { store } => {
                models::list(&open_store(store), cli.format)?;
            }
            ModelsCommands::Inspect { version, store } => {
                models::inspect(&open_store(store), version, cli.format)?;
            }
            ModelsCommands::Activate { version, store } => {
                models::activate(&open_store(store), &version, cli.format)?;
            }
        },
    }

    Ok(())
}
