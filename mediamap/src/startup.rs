use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use common::{Config, PipelineConfig, DEFAULT_API_URL, DEFAULT_MODEL};

use crate::llm::remote::RemoteLlmProvider;

/// Command-line values that take precedence over the config files
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Explicit override file; falls back to `./config.toml` when present
    pub config: Option<PathBuf>,
    pub sources: Option<usize>,
    pub batch_size: Option<usize>,
    pub output_dir: Option<PathBuf>,
}

/// Everything a run needs, checked before any network activity.
pub struct Startup {
    pub config: Config,
    pub pipeline: PipelineConfig,
    pub api_key: String,
}

/// Merge config files, apply overrides, validate the run and read the credential.
pub async fn prepare(
    topic: impl Into<String>,
    overrides: Overrides,
    default_path: &Path,
    catalog_len: usize,
) -> Result<Startup> {
    let override_path = match overrides.config {
        Some(p) if !p.exists() => {
            error!(path = ?p, "specified config file not found");
            bail!("Config file not found: {}", p.display());
        }
        Some(p) => Some(p),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(default_path).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(?default_path, ?override_path, "configuration loaded");

    let mut pipeline = config.pipeline_config(topic);
    if let Some(n) = overrides.sources {
        pipeline.num_sources = n;
    }
    if let Some(b) = overrides.batch_size {
        pipeline.batch_size = b;
    }
    if let Some(dir) = overrides.output_dir {
        pipeline.output_dir = dir;
    }

    pipeline.validate(catalog_len)?;
    let api_key = config.llm.api_key()?;

    Ok(Startup {
        config,
        pipeline,
        api_key,
    })
}

impl Startup {
    pub fn llm_provider(&self) -> RemoteLlmProvider {
        let llm = &self.config.llm;
        RemoteLlmProvider::new(
            llm.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            self.api_key.clone(),
            llm.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )
        .with_defaults(
            llm.timeout_seconds.unwrap_or(120),
            llm.max_tokens.unwrap_or(2000),
            llm.temperature.unwrap_or(0.3),
        )
    }
}
