use serde::{Deserialize, Serialize};

use super::prompt::{build_prompt, system_prompt};
use super::{ContentGenerator, ContentKind, GenerationError};

/// Content generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaGenerator {
    /// Build the blocking HTTP client. Must be called outside an async
    /// runtime context.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl ContentGenerator for OllamaGenerator {
    fn generate(&self, kind: ContentKind, context: &serde_json::Value) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = build_prompt(kind, context);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            system: system_prompt(kind),
            stream: false,
        };

        tracing::debug!(kind = kind.as_str(), model = %self.model, "Requesting generation");
        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                GenerationError::Unavailable(self.base_url.clone())
            } else if e.is_timeout() {
                GenerationError::HttpClient(format!(
                    "Request timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                GenerationError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::BackendError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        Ok(parsed.response)
    }

    fn is_remote(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let generator = OllamaGenerator::new("http://localhost:11434/", "llama3", 60).unwrap();
        assert_eq!(generator.base_url, "http://localhost:11434");
        assert_eq!(generator.timeout_secs, 60);
        assert!(generator.is_remote());
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let generator = OllamaGenerator::new("http://127.0.0.1:9", "llama3", 2).unwrap();
        let err = generator
            .generate(ContentKind::Message, &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Unavailable(_) | GenerationError::HttpClient(_)
        ));
    }
}
