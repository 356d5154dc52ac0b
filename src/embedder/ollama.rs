/// Embedder backed by an Ollama-compatible model server.
///
/// Uses the batch endpoint `POST {base_url}/api/embed`.
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, cfg: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model);
        let resp = self
            .client
            .post(self.endpoint())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(EmbedderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbedResponse = resp.json()?;
        check_batch(texts.len(), body.embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn check_batch(expected: usize, embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if embeddings.len() != expected {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }
    if embeddings.iter().any(Vec::is_empty) {
        return Err(EmbedderError::InvalidResponse(
            "empty embedding vector".to_string(),
        ));
    }
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(EmbedRequest {
            model: "orca-mini",
            input: &["a", "b"],
        })
        .unwrap();
        assert_eq!(body["model"], "orca-mini");
        assert_eq!(body["input"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_response_parsing() {
        let body: EmbedResponse =
            serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        let out = check_batch(2, body.embeddings).unwrap();
        assert_eq!(out[1], vec![0.3, 0.4]);
    }

    #[test]
    fn test_check_batch_rejects_bad_shapes() {
        assert!(check_batch(2, vec![vec![0.1]]).is_err());
        assert!(check_batch(1, vec![vec![]]).is_err());
    }

    #[test]
    fn test_endpoint() {
        let embedder = OllamaEmbedder::new("http://localhost:11434/", &EmbeddingConfig::default())
            .unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:11434/api/embed");
        assert_eq!(embedder.model(), "orca-mini");
    }
}
