//! Tract-based local embedding model (fallback for musl and Intel Mac).
//!
//! Pure-Rust path: loads the ONNX model with tract-onnx and tokenizes with
//! the tokenizers crate. [`TractModel::load`] downloads into
//! `~/.cache/kb-retrieval/models` on first use; callers run both `load`
//! and `embed` on the blocking pool.
#![cfg_attr(
    all(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"),
    allow(dead_code)
)]

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

use kb_retrieval_core::embedding::normalize_l2;

const ALL_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const ALL_MINILM_DIMS: usize = 384;
const DEFAULT_MAX_LEN: usize = 256;

/// Model manifest: name -> (onnx path in repo, tokenizer path in repo, dims).
fn model_manifest(model_name: &str) -> Result<(&'static str, &'static str, usize)> {
    match model_name {
        "all-minilm-l6-v2" => Ok(("onnx/model.onnx", "tokenizer.json", ALL_MINILM_DIMS)),
        _ => bail!(
            "Tract backend supports only all-minilm-l6-v2 for now. Requested: '{}'",
            model_name
        ),
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base)
        .join(".cache")
        .join("kb-retrieval")
        .join("models");
    std::fs::create_dir_all(&dir).map_err(|e| anyhow!("Create cache dir: {}", e))?;
    Ok(dir)
}

fn download_to_cache(repo: &str, path: &str, cache_path: &Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, path);
    tracing::info!(%url, "downloading model file");
    let bytes = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| anyhow!("Download {}: {}", url, e))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| anyhow!("Create cache parent: {}", e))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| anyhow!("Write cache: {}", e))?;
    Ok(())
}

/// A loaded tokenizer and optimized ONNX plan.
pub struct TractModel {
    tokenizer: tokenizers::Tokenizer,
    plan: TypedRunnableModel<TypedModel>,
    dims: usize,
}

impl TractModel {
    /// Fetch (if needed) and load `model_name`. Blocking.
    pub fn load(model_name: &str) -> Result<Self> {
        let (onnx_rel, tokenizer_rel, dims) = model_manifest(model_name)?;
        let model_dir = cache_dir()?.join(model_name);
        let onnx_path = model_dir.join(onnx_rel);
        let tokenizer_path = model_dir.join(tokenizer_rel);
        download_to_cache(ALL_MINILM_REPO, onnx_rel, &onnx_path)?;
        download_to_cache(ALL_MINILM_REPO, tokenizer_rel, &tokenizer_path)?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Load tokenizer: {}", e))?;

        let plan = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .map_err(|e| anyhow!("Load ONNX: {}", e))?
            .into_optimized()
            .map_err(|e| anyhow!("Optimize: {}", e))?
            .into_runnable()
            .map_err(|e| anyhow!("Build tract runnable: {}", e))?;

        Ok(Self {
            tokenizer,
            plan,
            dims,
        })
    }

    /// Embed one text, mean-pooling token states when the model returns
    /// them. Blocking.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenize: {}", e))?;

        let ids = encoding.get_ids();
        let len = ids.len().clamp(1, DEFAULT_MAX_LEN);
        let mut input_ids = vec![0i64; len];
        let mut attention_mask = vec![0i64; len];
        for (j, &id) in ids.iter().take(len).enumerate() {
            input_ids[j] = id as i64;
            attention_mask[j] = 1;
        }

        let input_ids: Tensor = ndarray::Array2::from_shape_vec((1, len), input_ids)
            .map_err(|e| anyhow!("Input ids shape: {}", e))?
            .into();
        let attention_mask: Tensor = ndarray::Array2::from_shape_vec((1, len), attention_mask)
            .map_err(|e| anyhow!("Attention mask shape: {}", e))?
            .into();
        let result = self
            .plan
            .run(tvec!(input_ids.into(), attention_mask.into()))?;

        let output = result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No output tensor"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| anyhow!("Output to array: {}", e))?;

        // [1, dims] (sentence embedding) or [1, seq_len, dims] (token states).
        let shape = view.shape().to_vec();
        let pooled = match shape.len() {
            2 => view.slice(ndarray::s![0, ..]).iter().copied().collect(),
            3 => {
                let valid = ids.len().min(shape[1]).min(len).max(1);
                let mut sum = vec![0f32; self.dims];
                for j in 0..valid {
                    for (k, &v) in view.slice(ndarray::s![0, j, ..]).iter().enumerate() {
                        if k < self.dims {
                            sum[k] += v;
                        }
                    }
                }
                for x in &mut sum {
                    *x /= valid as f32;
                }
                sum
            }
            _ => bail!("Unexpected output shape: {:?}", shape),
        };

        Ok(normalize_l2(pooled))
    }
}
