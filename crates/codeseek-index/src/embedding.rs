//! Embedding providers.
//!
//! [`Embedder`] is the contract the pipeline and query service depend on.
//! [`HttpEmbedder`] talks to OpenAI-compatible `/embeddings` endpoints
//! (OpenAI, Voyage); [`HashEmbedder`] is an offline hashing-trick embedder
//! that needs no key and gives the same vector for the same text every run.

use std::sync::Arc;

use codeseek_core::{CodeseekError, EmbeddingConfig, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const BATCH_DELAY_MS: u64 = 200;

/// Turns text into fixed-dimension vectors.
///
/// `embed_batch` must return exactly one vector per input text, in input
/// order, each of length [`Embedder::dimension`].
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension D of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of documents.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single document.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(CodeseekError::EmbedCountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Embed a search query. Providers that distinguish queries from
    /// documents override this.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }
}

/// Build the embedder selected by `config.provider`.
///
/// # Errors
///
/// Returns [`CodeseekError::Config`] for an unknown provider or a remote
/// provider with no API key.
///
/// # Examples
///
/// ```
/// use codeseek_core::EmbeddingConfig;
/// use codeseek_index::embedding::build_embedder;
///
/// let embedder = build_embedder(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.dimension(), 384);
/// ```
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        "openai" | "voyage" => Ok(Arc::new(HttpEmbedder::with_config(config)?)),
        other => Err(CodeseekError::Config(format!(
            "unknown embedding provider \"{other}\" (expected hash, openai or voyage)"
        ))),
    }
}

/// Remote API flavors understood by [`HttpEmbedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Voyage,
}

impl Provider {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(Provider::OpenAi),
            "voyage" => Some(Provider::Voyage),
            _ => None,
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Voyage => "https://api.voyageai.com/v1",
        }
    }

    fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Voyage => "VOYAGE_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputType {
    Document,
    Query,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for OpenAI-compatible embedding APIs.
///
/// # Examples
///
/// ```
/// use codeseek_core::EmbeddingConfig;
/// use codeseek_index::embedding::{Embedder, HttpEmbedder};
///
/// let config = EmbeddingConfig {
///     provider: "openai".into(),
///     api_key: Some("sk-test".into()),
///     dimensions: 256,
///     ..EmbeddingConfig::default()
/// };
/// let embedder = HttpEmbedder::with_config(&config).unwrap();
/// assert_eq!(embedder.model(), "text-embedding-3-small");
/// assert_eq!(embedder.dimension(), 256);
/// ```
pub struct HttpEmbedder {
    client: reqwest::Client,
    provider: Provider,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl HttpEmbedder {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to `OPENAI_API_KEY` or `VOYAGE_API_KEY` (by provider) if no
    /// key is set in the config.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Config`] if the provider is not a remote one
    /// or no API key is available.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = Provider::from_name(&config.provider).ok_or_else(|| {
            CodeseekError::Config(format!(
                "\"{}\" is not a remote embedding provider",
                config.provider
            ))
        })?;

        let env_var = provider.api_key_env();
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(env_var).ok())
            .ok_or_else(|| {
                CodeseekError::Config(format!(
                    "embedding API key not found: set embedding.api_key in .codeseek.toml or {env_var} env var"
                ))
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| provider.default_base_url().to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, texts: &'a [String], input_type: InputType) -> EmbedRequest<'a> {
        match self.provider {
            Provider::OpenAi => EmbedRequest {
                model: &self.model,
                input: texts,
                input_type: None,
                // Only the v3 models accept a custom output size.
                dimensions: self
                    .model
                    .starts_with("text-embedding-3")
                    .then_some(self.dimension),
            },
            Provider::Voyage => EmbedRequest {
                model: &self.model,
                input: texts,
                input_type: Some(match input_type {
                    InputType::Document => "document",
                    InputType::Query => "query",
                }),
                dimensions: None,
            },
        }
    }

    async fn request(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let request = self.build_request(texts, input_type);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| CodeseekError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(CodeseekError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CodeseekError::Embedding(format!("failed to parse response: {e}")))?;

        Ok(ordered_embeddings(embed_response))
    }
}

/// Restore input order when the API tags items with an `index`.
fn ordered_embeddings(response: EmbedResponse) -> Vec<Vec<f32>> {
    let mut items = response.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    items.into_iter().map(|item| item.embedding).collect()
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Splits `texts` into sub-batches of `batch_size` with a short delay
    /// between requests for rate limiting.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            all_embeddings.extend(self.request(batch, InputType::Document).await?);
        }
        Ok(all_embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()], InputType::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CodeseekError::Embedding("empty response from embedding API".into()))
    }
}

/// Deterministic offline embedder using the hashing trick.
///
/// Text is split into identifier-like tokens (snake_case and camelCase
/// identifiers are also split into their parts), and each token adds ±1 to
/// the bucket picked by its SHA-256 digest. Texts sharing vocabulary end up
/// close together, which is enough for keyword-flavored code search without
/// a model.
///
/// # Examples
///
/// ```
/// use codeseek_index::embedding::{Embedder, HashEmbedder};
///
/// # async fn example() {
/// let embedder = HashEmbedder::new(64);
/// let a = embedder.embed("def load_config(path)").await.unwrap();
/// let b = embedder.embed("def load_config(path)").await.unwrap();
/// assert_eq!(a.len(), 64);
/// assert_eq!(a, b);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Split text into lowercase tokens of at least two characters.
///
/// Compound identifiers contribute themselves plus each of their parts.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        let parts = split_identifier(word);
        if parts.len() > 1 {
            let whole: String = word.trim_matches('_').to_lowercase();
            if whole.chars().count() >= 2 {
                tokens.push(whole);
            }
        }
        tokens.extend(parts.into_iter().filter(|p| p.chars().count() >= 2));
    }
    tokens
}

fn split_identifier(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // "parseJson" and "HTTPServer" both break before the capital
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn openai_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("test-key".into()),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn openai_request_has_no_input_type() {
        let embedder = HttpEmbedder::with_config(&openai_config()).unwrap();
        let texts = vec!["def main(): pass".to_string(), "class Foo: pass".to_string()];
        let request = embedder.build_request(&texts, InputType::Document);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
        assert_eq!(json["dimensions"], 384);
        assert!(json.get("input_type").is_none());
    }

    #[test]
    fn voyage_request_marks_documents_and_queries() {
        let config = EmbeddingConfig {
            provider: "voyage".into(),
            model: "voyage-code-3".into(),
            api_key: Some("test-key".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::with_config(&config).unwrap();
        assert_eq!(embedder.base_url, "https://api.voyageai.com/v1");

        let texts = vec!["auth logic".to_string()];
        let doc = serde_json::to_value(embedder.build_request(&texts, InputType::Document)).unwrap();
        let query = serde_json::to_value(embedder.build_request(&texts, InputType::Query)).unwrap();
        assert_eq!(doc["input_type"], "document");
        assert_eq!(query["input_type"], "query");
        assert!(doc.get("dimensions").is_none());
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let config = EmbeddingConfig {
            base_url: Some("http://localhost:8080/v1/".into()),
            ..openai_config()
        };
        let embedder = HttpEmbedder::with_config(&config).unwrap();
        assert_eq!(embedder.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn response_is_reordered_by_index() {
        let json = r#"{
            "data": [
                {"index": 1, "embedding": [0.4, 0.5]},
                {"index": 0, "embedding": [0.1, 0.2]}
            ]
        }"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            ordered_embeddings(response),
            vec![vec![0.1, 0.2], vec![0.4, 0.5]]
        );
    }

    #[test]
    fn response_without_index_keeps_order() {
        let json = r#"{"data": [{"embedding": [1.0]}, {"embedding": [2.0]}]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(ordered_embeddings(response), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn missing_api_key_gives_clear_error() {
        std::env::remove_var("VOYAGE_API_KEY");
        let config = EmbeddingConfig {
            provider: "voyage".into(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        let err = HttpEmbedder::with_config(&config).unwrap_err().to_string();
        assert!(err.contains("VOYAGE_API_KEY"), "error should name the env var: {err}");
    }

    #[test]
    fn build_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        let result = build_embedder(&config);
        assert!(matches!(result, Err(CodeseekError::Config(_))));
    }

    #[test]
    fn split_identifier_handles_snake_and_camel_case() {
        assert_eq!(split_identifier("parse_json"), vec!["parse", "json"]);
        assert_eq!(split_identifier("parseJsonBody"), vec!["parse", "json", "body"]);
        assert_eq!(split_identifier("HTTPServer"), vec!["http", "server"]);
        assert_eq!(split_identifier("__init__"), vec!["init"]);
        assert_eq!(split_identifier("x"), vec!["x"]);
    }

    #[test]
    fn tokenize_keeps_whole_identifiers_and_parts() {
        let tokens = tokenize("user.load_profile(x)");
        assert_eq!(tokens, vec!["user", "load_profile", "load", "profile"]);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_with_fixed_dimension() {
        let embedder = HashEmbedder::new(128);
        let texts = vec!["def save(path): pass".to_string(), String::new()];
        let first = embedder.embed_batch(&texts).await.unwrap();
        let second = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|v| v.len() == 128));
        assert!(first[1].iter().all(|x| *x == 0.0), "no tokens gives a zero vector");
    }

    #[tokio::test]
    async fn hash_embedder_places_shared_vocabulary_closer() {
        let embedder = HashEmbedder::new(384);
        let doc = embedder.embed("def parse_json(data):\n    return json.loads(data)").await.unwrap();
        let related = embedder.embed_query("parse json").await.unwrap();
        let unrelated = embedder.embed_query("HttpServer socket listener").await.unwrap();

        assert!(cosine(&doc, &related) > cosine(&doc, &unrelated));
    }
}
