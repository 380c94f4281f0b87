//! Configuration parsing and validation.
//!
//! The analyst is configured from one TOML file (default
//! `./config/analyst.toml`, overridable with `--config`). Every section
//! except `[db]` and `[server]` may be omitted and falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/analyst.sqlite"
//!
//! [analysis]
//! window_size = 6
//! stride = 5
//! confidence_threshold = 0.35
//!
//! [inference.local]
//! provider = "ollama"
//! model = "gemma3:4b"
//!
//! [server]
//! bind = "127.0.0.1:7878"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use doc_analyst_core::chunk::{WindowPlan, DEFAULT_STRIDE, DEFAULT_WINDOW_SIZE};
use doc_analyst_core::routing::{RoutingPolicy, DEFAULT_CONFIDENCE_THRESHOLD};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// On-device model slots.
    #[serde(default = "default_local_concurrency")]
    pub local_concurrency: usize,
    #[serde(default = "default_cloud_concurrency")]
    pub cloud_concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            stride: default_stride(),
            confidence_threshold: default_confidence_threshold(),
            local_concurrency: default_local_concurrency(),
            cloud_concurrency: default_cloud_concurrency(),
        }
    }
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}
fn default_stride() -> usize {
    DEFAULT_STRIDE
}
fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_local_concurrency() -> usize {
    1
}
fn default_cloud_concurrency() -> usize {
    4
}

impl AnalysisConfig {
    pub fn window_plan(&self) -> Result<WindowPlan> {
        Ok(WindowPlan::new(self.window_size, self.stride)?)
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            confidence_threshold: self.confidence_threshold,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InferenceConfig {
    #[serde(default)]
    pub local: LocalInferenceConfig,
    #[serde(default)]
    pub cloud: CloudInferenceConfig,
}

/// On-device tier. `provider = "disabled"` makes every call fail as
/// unavailable.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalInferenceConfig {
    #[serde(default = "default_local_provider")]
    pub provider: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_local_url")]
    pub url: String,
    #[serde(default = "default_local_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_local_max_retries")]
    pub max_retries: u32,
}

impl Default for LocalInferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_local_provider(),
            model: default_local_model(),
            url: default_local_url(),
            timeout_secs: default_local_timeout_secs(),
            max_retries: default_local_max_retries(),
        }
    }
}

fn default_local_provider() -> String {
    "ollama".to_string()
}
fn default_local_model() -> String {
    "lfm2.5-1.2b-instruct".to_string()
}
fn default_local_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_local_timeout_secs() -> u64 {
    120
}
fn default_local_max_retries() -> u32 {
    2
}

/// Cloud escalation tier, only used for cases with cloud consent.
#[derive(Debug, Deserialize, Clone)]
pub struct CloudInferenceConfig {
    #[serde(default = "default_cloud_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_cloud_url")]
    pub url: String,
    #[serde(default = "default_cloud_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cloud_max_retries")]
    pub max_retries: u32,
}

impl Default for CloudInferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_cloud_provider(),
            model: None,
            url: default_cloud_url(),
            timeout_secs: default_cloud_timeout_secs(),
            max_retries: default_cloud_max_retries(),
        }
    }
}

fn default_cloud_provider() -> String {
    "disabled".to_string()
}
fn default_cloud_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_cloud_timeout_secs() -> u64 {
    60
}
fn default_cloud_max_retries() -> u32 {
    3
}

impl LocalInferenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl CloudInferenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate analysis
    if config.analysis.window_size < 2 {
        bail!("analysis.window_size must be >= 2");
    }
    if config.analysis.stride == 0 || config.analysis.stride >= config.analysis.window_size {
        bail!(
            "analysis.stride must satisfy 1 <= stride < window_size (got stride {}, window_size {})",
            config.analysis.stride,
            config.analysis.window_size
        );
    }
    if !(0.0..=1.0).contains(&config.analysis.confidence_threshold) {
        bail!("analysis.confidence_threshold must be in [0.0, 1.0]");
    }
    if config.analysis.local_concurrency == 0 || config.analysis.cloud_concurrency == 0 {
        bail!("analysis.local_concurrency and analysis.cloud_concurrency must be >= 1");
    }

    // Validate ingest
    if config.ingest.max_file_bytes == 0 {
        bail!("ingest.max_file_bytes must be > 0");
    }

    // Validate inference
    match config.inference.local.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown local inference provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }
    match config.inference.cloud.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown cloud inference provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.inference.local.model.trim().is_empty() {
        bail!("inference.local.model must not be empty");
    }
    if config.inference.cloud.is_enabled() && config.inference.cloud.model.is_none() {
        bail!(
            "inference.cloud.model must be specified when provider is '{}'",
            config.inference.cloud.provider
        );
    }

    Ok(config)
}
