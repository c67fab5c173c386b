//! TOML configuration for the `kbr` binary.
//!
//! ```toml
//! [db]
//! path = "./data/kbr.sqlite"
//!
//! [chunking]
//! mode = "token"
//! size = 500
//! overlap = 50
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! ```
//!
//! Only `[db]` is required. `[chunking]` supplies the defaults for
//! `kbr ingest`; `[embedding]` selects the provider (default `disabled`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use kb_retrieval_core::chunk::validate_config;
use kb_retrieval_core::models::{ChunkingConfig, ChunkingMode};

/// Provider names accepted in `embedding.provider`.
pub const PROVIDERS: &[&str] = &["disabled", "local", "openai", "ollama", "hash"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default = "default_chunking")]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

fn default_chunking() -> ChunkingConfig {
    ChunkingConfig::new(ChunkingMode::Token, 500, 50)
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Characters kept after preprocessing.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    2048
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    validate_config(&config.chunking).context("Invalid [chunking] section")?;

    let embedding = &config.embedding;
    if !PROVIDERS.contains(&embedding.provider.as_str()) {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be one of: {}.",
            embedding.provider,
            PROVIDERS.join(", ")
        );
    }

    // `local` resolves model and dims from its own model table.
    if embedding.is_enabled() && embedding.provider != "local" {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() && embedding.provider != "hash" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }

    if embedding.max_input_chars == 0 {
        anyhow::bail!("embedding.max_input_chars must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/kbr.sqlite\"\n").unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("./data/kbr.sqlite"));
        assert_eq!(cfg.chunking, ChunkingConfig::new(ChunkingMode::Token, 500, 50));
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.embedding.max_input_chars, 2048);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
            [db]
            path = "/tmp/kb.sqlite"

            [chunking]
            mode = "character"
            size = 1000
            overlap = 100

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
            url = "http://gpu-box:11434"
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.mode, ChunkingMode::Character);
        assert_eq!(cfg.chunking.size, 1000);
        assert_eq!(cfg.embedding.dims, Some(768));
        assert_eq!(cfg.embedding.url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(cfg.embedding.max_retries, 2);
        assert_eq!(cfg.embedding.timeout_secs, 30);
    }

    #[test]
    fn test_chunking_overlap_must_be_smaller_than_size() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nmode = \"token\"\nsize = 50\noverlap = 50\n",
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("chunking"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 8\n").is_err());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n"
        )
        .is_err());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n"
        )
        .is_ok());
    }

    #[test]
    fn test_hash_provider_needs_only_dims() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").is_err());
        let cfg =
            parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\ndims = 64\n").unwrap();
        assert_eq!(cfg.embedding.dims, Some(64));
    }

    #[test]
    fn test_local_provider_needs_nothing_else() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\n").is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/kbr.example.toml")).unwrap();
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.embedding.max_input_chars, 2048);
        assert_eq!(cfg.chunking, ChunkingConfig::new(ChunkingMode::Token, 500, 50));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_config(Path::new("/nonexistent/kbr.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kbr.toml"));
    }
}
