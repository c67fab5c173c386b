//! Embedding providers for the core [`Embedder`] trait.
//!
//! - **[`DisabledEmbedder`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs models locally via fastembed (primary) or tract (musl/Intel Mac); no network calls after model download.
//! - **[`HashingEmbedder`]**: deterministic feature hashing, no model at all.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to build the provider named by the configuration:
//!
//! ```rust,no_run
//! # use kb_retrieval::config::EmbeddingConfig;
//! # use kb_retrieval::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_version(), "disabled");
//! ```
//!
//! # Initialization
//!
//! Model-backed providers load (or connect) at most once per instance,
//! through a [`LazyInit`] over `tokio::sync::OnceCell`. Concurrent first
//! calls wait on the same load. A failed load is reported as
//! [`RetrievalError::ModelInitializationFailure`] and leaves the cell
//! empty, so a later call may try again.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;

pub use kb_retrieval_core::embedding::{Embedder, HashingEmbedder};
use kb_retrieval_core::embedding::{finish_vector, prepare_input};
use kb_retrieval_core::RetrievalError;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Build the [`Embedder`] named by `config.provider`.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (fastembed or tract, see features) |
/// | `"hash"` | [`HashingEmbedder`] |
///
/// Construction never loads a model; that happens on
/// [`Embedder::initialize`] or the first [`Embedder::embed`].
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow!("embedding.dims required for hash provider"))?;
            Ok(Arc::new(HashingEmbedder::new(dims, config.max_input_chars)))
        }
        #[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn init_error(e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::ModelInitializationFailure(e.to_string())
}

fn embed_error(e: anyhow::Error) -> RetrievalError {
    RetrievalError::EmbeddingFailure(format!("{:#}", e))
}

/// A provider resource built at most once.
///
/// Concurrent first callers share one build. A failed build leaves the
/// cell empty and the next caller builds again.
pub struct LazyInit<T> {
    cell: OnceCell<T>,
    provider: &'static str,
}

impl<T> LazyInit<T> {
    pub fn new(provider: &'static str) -> Self {
        Self {
            cell: OnceCell::new(),
            provider,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<&T, RetrievalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RetrievalError>>,
    {
        self.cell
            .get_or_try_init(|| async {
                tracing::debug!(provider = self.provider, "initializing embedding provider");
                let built = init().await;
                if let Err(e) = &built {
                    tracing::warn!(provider = self.provider, error = %e, "embedding provider initialization failed");
                }
                built
            })
            .await
    }
}

// ============ Disabled Provider ============

/// An embedder that refuses to run.
///
/// Used when `embedding.provider = "disabled"`. Ingestion of non-empty
/// text and every query fail with a model initialization error.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_version(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn initialize(&self) -> Result<(), RetrievalError> {
        Err(init_error(
            "embedding provider is disabled; set [embedding].provider in the config",
        ))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.initialize().await?;
        Err(RetrievalError::EmbeddingFailure("embedding provider is disabled".to_string()))
    }
}

// ============ HTTP Providers ============

/// Settings shared by the HTTP-backed providers.
#[derive(Debug, Clone)]
struct HttpSettings {
    model: String,
    dims: usize,
    max_chars: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl HttpSettings {
    fn from_config(config: &EmbeddingConfig, provider: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
        Ok(Self {
            model,
            dims,
            max_chars: config.max_input_chars,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

/// POST a JSON body with retry/backoff and return the parsed JSON response.
///
/// - HTTP 429 or 5xx → retry with exponential backoff
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("{} API error {}: {}", provider, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", provider, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", provider, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", provider)))
}

fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
    json_to_vector(embedding)
}

/// Extract `embeddings[0]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
    json_to_vector(first)
}

// ============ OpenAI Provider ============

struct OpenAiSession {
    client: reqwest::Client,
    api_key: String,
}

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable at initialization.
pub struct OpenAiEmbedder {
    settings: HttpSettings,
    session: LazyInit<OpenAiSession>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            settings: HttpSettings::from_config(config, "OpenAI")?,
            session: LazyInit::new("OpenAI"),
        })
    }

    async fn session(&self) -> Result<&OpenAiSession, RetrievalError> {
        self.session
            .get_or_init(|| async {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| init_error("OPENAI_API_KEY environment variable not set"))?;
                let client = self.settings.build_client().map_err(init_error)?;
                Ok(OpenAiSession { client, api_key })
            })
            .await
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_version(&self) -> &str {
        &self.settings.model
    }

    fn dims(&self) -> usize {
        self.settings.dims
    }

    async fn initialize(&self) -> Result<(), RetrievalError> {
        self.session().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let session = self.session().await?;
        let input = prepare_input(text, self.settings.max_chars)?;
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": [input],
        });

        let json = post_with_retry(
            &session.client,
            OPENAI_URL,
            Some(session.api_key.as_str()),
            &body,
            self.settings.max_retries,
            "OpenAI",
        )
        .await
        .map_err(embed_error)?;

        let vector = parse_openai_response(&json).map_err(embed_error)?;
        finish_vector(vector, self.settings.dims)
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    settings: HttpSettings,
    url: String,
    client: LazyInit<reqwest::Client>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            settings: HttpSettings::from_config(config, "Ollama")?,
            url: url.trim_end_matches('/').to_string(),
            client: LazyInit::new("Ollama"),
        })
    }

    async fn client(&self) -> Result<&reqwest::Client, RetrievalError> {
        self.client
            .get_or_init(|| async { self.settings.build_client().map_err(init_error) })
            .await
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_version(&self) -> &str {
        &self.settings.model
    }

    fn dims(&self) -> usize {
        self.settings.dims
    }

    async fn initialize(&self) -> Result<(), RetrievalError> {
        self.client().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let client = self.client().await?;
        let input = prepare_input(text, self.settings.max_chars)?;
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": [input],
        });

        let json = post_with_retry(
            client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.settings.max_retries,
            "Ollama",
        )
        .await
        .map_err(embed_error)?;

        let vector = parse_ollama_response(&json).map_err(embed_error)?;
        finish_vector(vector, self.settings.dims)
    }
}

// ============ Local Provider (fastembed or tract) ============

/// Model name and dimensionality for the `local` provider.
///
/// `embedding.model` defaults to `all-minilm-l6-v2`; `embedding.dims`
/// defaults to the model's known output size.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
type LoadedModel = Arc<std::sync::Mutex<fastembed::TextEmbedding>>;

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
type LoadedModel = Arc<local_tract::TractModel>;

/// Embedding provider for local inference (fastembed on primary platforms, tract on musl/Intel Mac).
///
/// Models are downloaded on first use from Hugging Face and cached.
/// After initial download, no network calls are needed and embeddings run offline.
/// Inference runs on the blocking thread pool.
#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    max_chars: usize,
    model: LazyInit<LoadedModel>,
}

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        #[cfg(feature = "local-embeddings-fastembed")]
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            max_chars: config.max_input_chars,
            model: LazyInit::new("local"),
        })
    }

    async fn model(&self) -> Result<&LoadedModel, RetrievalError> {
        self.model
            .get_or_init(|| async {
                let model_name = self.model_name.clone();
                tracing::info!(model = %model_name, "loading local embedding model");
                tokio::task::spawn_blocking(move || load_model(&model_name))
                    .await
                    .map_err(init_error)?
                    .map_err(|e| init_error(format!("{:#}", e)))
            })
            .await
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn load_model(model_name: &str) -> Result<LoadedModel> {
    let model = fastembed::TextEmbedding::try_new(
        fastembed::InitOptions::new(config_to_fastembed_model(model_name)?)
            .with_show_download_progress(true),
    )
    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
    Ok(Arc::new(std::sync::Mutex::new(model)))
}

#[cfg(feature = "local-embeddings-fastembed")]
fn run_model(model: &LoadedModel, text: String) -> Result<Vec<f32>> {
    let mut guard = model
        .lock()
        .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
    guard
        .embed(vec![text], None)
        .map_err(|e| anyhow!("Local embedding failed: {}", e))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
fn load_model(model_name: &str) -> Result<LoadedModel> {
    Ok(Arc::new(local_tract::TractModel::load(model_name)?))
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
fn run_model(model: &LoadedModel, text: String) -> Result<Vec<f32>> {
    model.embed(&text)
}

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_version(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self) -> Result<(), RetrievalError> {
        self.model().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let model = Arc::clone(self.model().await?);
        let input = prepare_input(text, self.max_chars)?;

        let vector = tokio::task::spawn_blocking(move || run_model(&model, input))
            .await
            .map_err(|e| RetrievalError::EmbeddingFailure(e.to_string()))?
            .map_err(embed_error)?;

        finish_vector(vector, self.dims)
    }
}
