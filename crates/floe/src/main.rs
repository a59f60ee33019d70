use anyhow::Context;
use clap::Parser;
use floe::Settings;
use floe_connector_postgres::PostgresConnectionFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Extracts a PostgreSQL table or query into a CSV file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Job settings file (TOML, YAML or JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Overrides `output.path`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overrides `job.parallelism`.
    #[arg(short, long)]
    parallelism: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("cannot load settings from {}", args.config.display()))?;
    if let Some(output) = args.output {
        settings.output.path = output;
    }
    if let Some(parallelism) = args.parallelism {
        settings.job.parallelism = parallelism;
    }

    let summary = floe::run(&settings, Arc::new(PostgresConnectionFactory::new())).await?;
    tracing::debug!(?summary, "job summary");
    Ok(())
}
