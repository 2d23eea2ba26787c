//! CLI command definitions and dispatch.

pub mod dataset;
pub mod job;
pub mod migrate;
pub mod worker;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use namestats_core::config::AppConfig;
use namestats_core::error::AppError;
use namestats_database::DatabasePool;

/// NameStats: baby-name dataset ingestion
#[derive(Debug, Parser)]
#[command(name = "namestats", version, about, long_about = None)]
pub struct Cli {
    /// Explicit configuration file (skips the default/environment overlay)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Configuration environment overlay (config/{env}.toml)
    #[arg(short, long, env = "NAMESTATS_ENV", default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Dataset upload and lifecycle
    Dataset(dataset::DatasetArgs),
    /// Job inspection
    Job(job::JobArgs),
    /// Worker queue management
    Worker(worker::WorkerArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = self.load_config()?;
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &config, self.format).await,
            Commands::Dataset(args) => dataset::execute(args, &config, self.format).await,
            Commands::Job(args) => job::execute(args, &config, self.format).await,
            Commands::Worker(args) => worker::execute(args, &config, self.format).await,
        }
    }

    fn load_config(&self) -> Result<AppConfig, AppError> {
        match &self.config {
            Some(path) => AppConfig::from_file(path),
            None => AppConfig::load(&self.env),
        }
    }
}

/// Helper: create database pool from config
pub async fn create_db_pool(config: &AppConfig) -> Result<DatabasePool, AppError> {
    DatabasePool::connect(&config.database).await
}
