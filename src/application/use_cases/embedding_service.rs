use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Turns text into dense vectors. Query and document embeddings must come
/// from the same implementation.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Empty embedding response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
    local_embedder: Arc<Mutex<Option<TextEmbedding>>>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            local_embedder: Arc::new(Mutex::new(None)),
        }
    }

    fn resolve_local_embedding_model(model: &str) -> EmbeddingModel {
        let normalized = model.trim().to_lowercase();
        match normalized
            .trim_start_matches("sentence-transformers/")
            .trim_start_matches("baai/")
        {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                warn!(model = %other, "Unknown local embedding model, using all-MiniLM-L6-v2");
                EmbeddingModel::AllMiniLML6V2
            }
        }
    }

    async fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Self::resolve_local_embedding_model(&self.config.model);
        let slot = Arc::clone(&self.local_embedder);
        let texts = texts.to_vec();

        // ONNX inference is CPU bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| AppError::Internal("Local embedder lock poisoned".to_string()))?;
            if guard.is_none() {
                info!(model = ?model, "Loading local embedding model");
                let embedder = TextEmbedding::try_new(InitOptions::new(model)).map_err(|e| {
                    AppError::Internal(format!("Failed to init local embedder: {}", e))
                })?;
                *guard = Some(embedder);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| AppError::Internal("Local embedder unavailable".to_string()))?;
            embedder
                .embed(texts, None)
                .map_err(|e| AppError::Internal(format!("Failed to embed text: {}", e)))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))?
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{}/embeddings", base_url);

        let request = OpenAIEmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let mut req = self.client.post(&url);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req.json(&request).send().await.map_err(|e| {
            AppError::Internal(format!("Failed to call embedding API ({}): {}", url, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Internal(format!(
                "Embedding API returned error {} (URL: {}): {}",
                status, url, error_text
            )));
        }

        let mut parsed: OpenAIEmbeddingResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse embedding response: {}", e))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(AppError::Internal(format!(
                "Embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .trim_end_matches("/v1");
        let url = format!("{}/api/embeddings", base_url);

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let request = OllamaEmbeddingRequest {
                model: &self.config.model,
                prompt: text,
            };
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    AppError::Internal(format!("Failed to call embedding API ({}): {}", url, e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::Internal(format!(
                    "Embedding API returned error {} (URL: {}): {}",
                    status, url, error_text
                )));
            }

            let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
                AppError::Internal(format!("Failed to parse embedding response: {}", e))
            })?;
            embeddings.push(parsed.embedding);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let embeddings = match self.config.provider {
            EmbeddingProvider::Local => self.embed_local(texts).await?,
            EmbeddingProvider::OpenAI => self.embed_openai(texts).await?,
            EmbeddingProvider::Ollama => self.embed_ollama(texts).await?,
        };
        if embeddings.iter().any(|e| e.is_empty()) {
            return Err(AppError::Internal("Empty embedding response".to_string()));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_config(provider: EmbeddingProvider, server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            model: "text-embedding-3-small".to_string(),
            base_url: Some(server.uri()),
            api_key: Some("sk-test".to_string()),
        }
    }

    #[test]
    fn test_resolve_local_model_accepts_hub_prefix() {
        assert_eq!(
            EmbeddingService::resolve_local_embedding_model(
                "sentence-transformers/all-MiniLM-L6-v2"
            ),
            EmbeddingModel::AllMiniLML6V2
        );
        assert_eq!(
            EmbeddingService::resolve_local_embedding_model("BAAI/bge-small-en-v1.5"),
            EmbeddingModel::BGESmallENV15
        );
    }

    #[tokio::test]
    async fn test_openai_embeddings_are_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::new(remote_config(EmbeddingProvider::OpenAI, &server));
        let out = service
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_ollama_embeds_one_prompt_per_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.5, 0.5, 0.0]})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let service = EmbeddingService::new(remote_config(EmbeddingProvider::Ollama, &server));
        let out = service
            .embed(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let service = EmbeddingService::new(remote_config(EmbeddingProvider::OpenAI, &server));
        let err = service.embed_one("q").await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
