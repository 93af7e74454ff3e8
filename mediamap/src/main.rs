/*
mediamap - main.rs
Runs one comparison: plan sources for a topic, extract each outlet's coverage
through a browser, aggregate the results and write a markdown report.
*/

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::sources::global_sources;
use mediamap::browser::mcp::McpSessionFactory;
use mediamap::pipeline::run_pipeline;
use mediamap::startup::{prepare, Overrides};

#[derive(Parser, Debug)]
#[command(name = "mediamap", about = "Compare how news outlets around the world cover a topic")]
struct Args {
    /// News topic to research
    #[arg(short, long)]
    topic: String,

    /// Number of sources to select [default: 10]
    #[arg(short = 'n', long)]
    sources: Option<usize>,

    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory receiving the report
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Sources processed concurrently per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Credentials may live in a local .env file
    dotenv::dotenv().ok();

    // Fail fast, before any network activity
    let catalog = global_sources();
    let overrides = Overrides {
        config: args.config,
        sources: args.sources,
        batch_size: args.batch_size,
        output_dir: args.output_dir,
    };
    let startup = prepare(
        args.topic,
        overrides,
        Path::new("config.default.toml"),
        catalog.len(),
    )
    .await?;

    let provider = startup.llm_provider();
    info!(model = %provider.model(), "LLM provider initialized");

    let sessions = McpSessionFactory::new(startup.config.browser.clone());

    match run_pipeline(&startup.pipeline, &catalog, Arc::new(provider), Arc::new(sessions)).await {
        Ok(outcome) => {
            println!("{}", outcome.report_path.display());
            Ok(())
        }
        Err(e) => {
            error!("pipeline failed: {:#}", e);
            Err(e)
        }
    }
}
