use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod cluster;
mod config;
mod engine;
mod error;
mod export;
mod features;
mod forecast;
mod model_store;
mod models;
mod schema;
mod store;

use config::Config;
use engine::Engine;
use model_store::ModelStore;
use store::{RecordKind, Store};

#[derive(Parser)]
#[command(name = "shelter-analytics")]
#[command(about = "Adoption trend forecasting and hotspot clustering for animal shelters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamArg {
    Intake,
    Outcome,
}

impl From<StreamArg> for RecordKind {
    fn from(value: StreamArg) -> Self {
        match value {
            StreamArg::Intake => RecordKind::Intake,
            StreamArg::Outcome => RecordKind::Outcome,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small fixture dataset
    Seed,
    /// Import intake or outcome records from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: StreamArg,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Train the forecast model and write the forecast table
    Train {
        #[arg(long, default_value = "forecast_results.csv")]
        out: PathBuf,
    },
    /// Print adoption trend predictions as JSON
    Trends {
        /// Skip model training and use the fast statistical path
        #[arg(long)]
        quick: bool,
    },
    /// Run hotspot clustering and write the cluster table
    Hotspots {
        #[arg(long, default_value = "hotspot_clusters.csv")]
        out: PathBuf,
    },
    /// Print the inertia curve used for offline cluster-count analysis
    Elbow,
    /// Show data and model status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Store::new(pool, config.sample_threshold);
    let model_store = ModelStore::new(config.model_path.clone());
    let engine = Engine::new(store.clone(), model_store, &config);
    engine.load_persisted_model().await;

    match cli.command {
        Commands::InitDb => {
            store.init_schema().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = store.seed().await?;
            println!("Inserted {inserted} seed records.");
        }
        Commands::Import { kind, csv } => {
            let kind: RecordKind = kind.into();
            let inserted = store.import_csv(kind, &csv).await?;
            println!(
                "Inserted {inserted} {} records from {}.",
                kind.label(),
                csv.display()
            );
        }
        Commands::Train { out } => {
            let outcome = engine.retrain().await?;
            export::write_forecast_csv(&out, &outcome.forecast)?;
            println!(
                "Model trained on {} daily points (accuracy {:.2}).",
                outcome.series_points, outcome.accuracy
            );
            println!("Forecast written to {}.", out.display());
        }
        Commands::Trends { quick } => {
            let response = if quick {
                engine.quick_trends().await?
            } else {
                engine.trends().await?
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Hotspots { out } => {
            let response = engine.hotspots().await?;
            if !response.clusters.is_empty() {
                export::write_cluster_csv(&out, &response.clusters)?;
                println!("Cluster table written to {}.", out.display());
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Elbow => {
            let curve = engine.elbow().await?;
            for (k, inertia) in curve {
                println!("k={k} inertia={inertia:.2}");
            }
        }
        Commands::Status => {
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
