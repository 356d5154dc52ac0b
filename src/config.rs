/// Configuration module for faq-store.
///
/// Handles loading, validating, and providing default configuration values.
/// Values come from a JSON file and can be overridden by environment variables.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::models::Distance;

/// The only storage driver this build understands.
pub const SQLITE_VEC_DRIVER: &str = "sqlite-vec";

// ── Default value functions ──────────────────────────────────────────

fn default_driver() -> String {
    SQLITE_VEC_DRIVER.to_string()
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_database() -> String {
    "faqdb".to_string()
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    60
}

fn default_embedding_host() -> String {
    "localhost".to_string()
}

fn default_embedding_port() -> u16 {
    11434
}

fn default_embedding_model() -> String {
    "orca-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_corpus_path() -> String {
    "./storage/FAQ.csv".to_string()
}

fn default_delimiter() -> char {
    ';'
}

fn default_chunk_size() -> usize {
    1000
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_search_top_k() -> usize {
    1
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub startup: StartupConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Directory holding the database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a single checkout waits before giving up.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub distance: Distance,

    /// Overrides the collection name derived from the embedding model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StartupConfig {
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_host")]
    pub host: String,

    #[serde(default = "default_embedding_port")]
    pub port: u16,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: String,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_top_k")]
    pub top_k: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            data_dir: default_data_dir(),
            database: default_database(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            distance: Distance::default(),
            collection: None,
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: default_embedding_host(),
            port: default_embedding_port(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
            delimiter: default_delimiter(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_search_top_k(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        let mut cfg = if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }
            cfg
        } else {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;

            match serde_json::from_str(&data) {
                Ok(c) => {
                    info!("Loaded configuration from {path}");
                    c
                }
                Err(e) => {
                    warn!("Invalid JSON in {path}: {e}");
                    warn!("Using default configuration");
                    Self::default()
                }
            }
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("FAQ_STORE_DATA_DIR") {
            self.store.data_dir = v;
        }
        if let Some(v) = non_empty("FAQ_STORE_DATABASE") {
            self.store.database = v;
        }
        if let Some(v) = non_empty("OLLAMA_HOST") {
            self.embedding.host = v;
        }
        if let Some(v) = non_empty("OLLAMA_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = non_empty("FAQ_CORPUS_PATH") {
            self.corpus.path = v;
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.store.driver == SQLITE_VEC_DRIVER,
            "unsupported store.driver {:?} (expected {SQLITE_VEC_DRIVER:?})",
            self.store.driver
        );
        anyhow::ensure!(
            is_plain_name(&self.store.database),
            "store.database must be a plain name, got {:?}",
            self.store.database
        );
        anyhow::ensure!(
            self.store.max_connections > 0,
            "store.max_connections must be positive"
        );
        anyhow::ensure!(
            self.store.min_connections <= self.store.max_connections,
            "store.min_connections must not exceed store.max_connections"
        );
        anyhow::ensure!(
            self.store.connect_timeout_ms > 0,
            "store.connect_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.startup.max_attempts > 0,
            "startup.max_attempts must be positive"
        );
        anyhow::ensure!(
            !self.embedding.model.trim().is_empty(),
            "embedding.model must not be empty"
        );
        anyhow::ensure!(self.corpus.chunk_size > 0, "corpus.chunk_size must be positive");
        anyhow::ensure!(
            self.corpus.delimiter.is_ascii(),
            "corpus.delimiter must be a single ASCII character"
        );
        anyhow::ensure!(self.search.top_k > 0, "search.top_k must be positive");
        Ok(())
    }

    /// Full path of the database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.store.data_dir).join(format!("{}.db", self.store.database))
    }

    /// Collection name: the explicit override, or one derived from the embedding model.
    #[must_use]
    pub fn collection_name(&self) -> String {
        match &self.store.collection {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => collection_name_for_model(&self.embedding.model),
        }
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.startup.retry_interval_secs)
    }

    #[must_use]
    pub fn embedding_base_url(&self) -> String {
        let host = self.embedding.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.embedding.port)
        } else {
            format!("http://{host}:{}", self.embedding.port)
        }
    }
}

/// Derive a collection name such as `questions_orca_mini` from a model identifier.
#[must_use]
pub fn collection_name_for_model(model: &str) -> String {
    let suffix: String = model
        .trim()
        .chars()
        .map(|c| if matches!(c, '-' | ':' | '.' | '/') { '_' } else { c })
        .collect();
    format!("questions_{suffix}")
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ── Tests ────────────────────────────────────────────────────────────
