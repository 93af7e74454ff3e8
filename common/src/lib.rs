/*!
common/src/lib.rs

Shared configuration types, schemas and the source catalog for mediamap.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default and an override config file
- The resolved per-run `PipelineConfig` handed to each stage
*/

pub mod error;
pub mod schema;
pub mod sources;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEFAULT_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_NUM_SOURCES: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_STEPS: usize = 8;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_OUTPUT_DIR: &str = "runs";
pub const DEFAULT_BROWSER_COMMAND: &str = "npx";
pub const DEFAULT_BROWSER_ARGS: &[&str] = &["@playwright/mcp@latest"];

/// Extra sources the planner may pick beyond the requested count.
pub const SELECTION_SLACK: usize = 2;

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the env var holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl LlmConfig {
    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }

    /// Read the credential from the environment. Called before any network activity.
    pub fn api_key(&self) -> std::result::Result<String, ConfigError> {
        let var = self.api_key_env();
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub num_sources: Option<usize>,
    pub batch_size: Option<usize>,
    /// Pause between extraction batches
    pub batch_delay_ms: Option<u64>,
    /// Maximum browser actions per source
    pub max_steps: Option<usize>,
    /// 0 disables the per-source timeout
    pub worker_timeout_seconds: Option<u64>,
    pub output_dir: Option<String>,
}

/// Browser automation server (MCP over stdio)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub call_timeout_seconds: Option<u64>,
}

impl BrowserConfig {
    pub fn command(&self) -> String {
        self.command
            .clone()
            .unwrap_or_else(|| DEFAULT_BROWSER_COMMAND.to_string())
    }

    pub fn args(&self) -> Vec<String> {
        self.args
            .clone()
            .unwrap_or_else(|| DEFAULT_BROWSER_ARGS.iter().map(|a| a.to_string()).collect())
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (path, label) in [(default_path, "default"), (override_path, "override")] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Resolve the per-run pipeline configuration for `topic`.
    pub fn pipeline_config(&self, topic: impl Into<String>) -> PipelineConfig {
        let p = &self.pipeline;
        let worker_timeout = match p.worker_timeout_seconds.unwrap_or(DEFAULT_WORKER_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        PipelineConfig {
            topic: topic.into(),
            num_sources: p.num_sources.unwrap_or(DEFAULT_NUM_SOURCES),
            batch_size: p.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            batch_delay: Duration::from_millis(p.batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS)),
            max_steps: p.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
            worker_timeout,
            output_dir: PathBuf::from(p.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR)),
        }
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Inclusive bounds on how many sources planning may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionBounds {
    pub min: usize,
    pub max: usize,
}

impl SelectionBounds {
    pub fn contains(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }
}

/// Explicit per-run configuration passed into every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub topic: String,
    pub num_sources: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_steps: usize,
    pub worker_timeout: Option<Duration>,
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Config::default().pipeline_config(topic)
    }

    /// Reject configurations that cannot produce a run, before any stage starts.
    pub fn validate(&self, catalog_len: usize) -> std::result::Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.num_sources == 0 || self.num_sources > catalog_len {
            return Err(ConfigError::SourceCount {
                requested: self.num_sources,
                available: catalog_len,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BatchSize);
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `[num_sources, num_sources + SELECTION_SLACK]`, capped at the catalog size.
    pub fn selection_bounds(&self, catalog_len: usize) -> SelectionBounds {
        let min = self.num_sources;
        let max = (min + SELECTION_SLACK).min(catalog_len).max(min);
        SelectionBounds { min, max }
    }
}
