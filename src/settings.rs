use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Confidence a prediction must reach before it is written, on the 0..1 scale.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u32,
    /// Character n-grams seen in fewer reference transactions are ignored.
    #[serde(default = "default_ngram_min_df")]
    pub ngram_min_df: usize,
    #[serde(default = "default_internal_transfer_keywords")]
    pub internal_transfer_keywords: Vec<String>,
    #[serde(default)]
    pub forbidden_descriptions: Vec<String>,
    #[serde(default)]
    pub openai: OpenAiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub embedding_batch_size: usize,
    pub llm_batch_size: usize,
    pub max_prompt_tokens: usize,
    pub max_supplier_profiles: usize,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4-0125-preview".to_string(),
            embedding_batch_size: 64,
            llm_batch_size: 150,
            max_prompt_tokens: 100_000,
            max_supplier_profiles: 100,
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_cache_ttl_days() -> u32 {
    30
}

fn default_ngram_min_df() -> usize {
    1
}

fn default_internal_transfer_keywords() -> Vec<String> {
    [
        "intern overføring",
        "overføring mellom egne kontoer",
        "overføring til egen konto",
        "overføring fra egen konto",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            threshold: default_threshold(),
            cache_ttl_days: default_cache_ttl_days(),
            ngram_min_df: default_ngram_min_df(),
            internal_transfer_keywords: default_internal_transfer_keywords(),
            forbidden_descriptions: Vec::new(),
            openai: OpenAiSettings::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("ledgermatch.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("cache")
    }

    pub fn results_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("results")
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cache_ttl_days))
    }
}

/// Secrets read from the environment once and handed to whoever needs them.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self { openai_api_key }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ledgermatch")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("ledgermatch")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("ignoring unreadable settings at {}: {e}", path.display());
            Settings::default()
        })
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LedgerError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
