//! TOML configuration parsing and validation.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. The only required input is the Notion credential,
//! which is read from the environment variable named by `notion.token_env`.
//!
//! # Example
//!
//! ```toml
//! [notion]
//! token_env = "NOTION_TOKEN"
//!
//! [cache]
//! path = "./data/page_cache.json"
//! ttl_secs = 3600
//!
//! [search]
//! content_candidate_cap = 20
//! content_concurrency = 4
//! rate_limit_ms = 100
//!
//! [scoring]
//! combined_score_cap = 2.0
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HarnessError;
use crate::scoring::ScoringPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Remote service connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct NotionConfig {
    /// Name of the environment variable holding the integration token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Value sent in the `Notion-Version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_api_base(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_token_env() -> String {
    "NOTION_TOKEN".to_string()
}
fn default_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}
fn default_api_version() -> String {
    "2022-06-28".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Location of the persisted hierarchy snapshot.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Snapshot lifetime before `get_or_refresh` triggers a rebuild.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/page_cache.json")
}
fn default_ttl_secs() -> u64 {
    3600
}

/// Limits for the search engine's remote traffic.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Hard cap on pages fetched by the content strategy per query.
    #[serde(default = "default_content_candidate_cap")]
    pub content_candidate_cap: usize,
    /// Maximum content fetches in flight at once.
    #[serde(default = "default_content_concurrency")]
    pub content_concurrency: usize,
    /// Minimum spacing between consecutive content fetch starts.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Maximum hits requested from the remote keyword search.
    #[serde(default = "default_api_result_limit")]
    pub api_result_limit: usize,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    /// Approximate width of content previews, in characters.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            content_candidate_cap: default_content_candidate_cap(),
            content_concurrency: default_content_concurrency(),
            rate_limit_ms: default_rate_limit_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            api_result_limit: default_api_result_limit(),
            default_max_results: default_max_results(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_content_candidate_cap() -> usize {
    20
}
fn default_content_concurrency() -> usize {
    4
}
fn default_rate_limit_ms() -> u64 {
    100
}
fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_api_result_limit() -> usize {
    50
}
fn default_max_results() -> usize {
    10
}
fn default_preview_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Read the integration token from the configured environment variable.
    ///
    /// An unset or blank variable is [`HarnessError::CredentialMissing`],
    /// which every command that talks to the remote treats as fatal.
    pub fn credential(&self) -> Result<String, HarnessError> {
        match std::env::var(&self.notion.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(HarnessError::CredentialMissing(self.notion.token_env.clone())),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to built-in defaults.
///
/// Used for the implicit default location only; an explicitly passed
/// `--config` that does not exist is still an error.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.notion.token_env.trim().is_empty() {
        anyhow::bail!("notion.token_env must not be empty");
    }
    if config.notion.timeout_secs == 0 {
        anyhow::bail!("notion.timeout_secs must be > 0");
    }

    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }

    let search = &config.search;
    if search.content_candidate_cap == 0 {
        anyhow::bail!("search.content_candidate_cap must be >= 1");
    }
    if search.content_concurrency == 0 {
        anyhow::bail!("search.content_concurrency must be >= 1");
    }
    if search.fetch_timeout_secs == 0 {
        anyhow::bail!("search.fetch_timeout_secs must be >= 1");
    }
    if !(1..=100).contains(&search.api_result_limit) {
        anyhow::bail!("search.api_result_limit must be in [1, 100]");
    }
    if search.default_max_results == 0 {
        anyhow::bail!("search.default_max_results must be >= 1");
    }
    if search.preview_chars < 20 {
        anyhow::bail!("search.preview_chars must be >= 20");
    }

    config.scoring.validate()?;

    Ok(())
}
