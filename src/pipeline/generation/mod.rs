//! Content generation: visit summaries, transcript notes, assessment
//! analyses and drafted messages.
//!
//! Callers hand a [`ContentKind`] and a JSON context to a
//! [`ContentGenerator`] and get text back. Kinds that expect structured
//! output are validated by the `parse` functions before anything is written.

pub mod ollama;
pub mod parse;
pub mod prompt;
pub mod template;

pub use ollama::OllamaGenerator;
pub use parse::*;
pub use template::TemplateGenerator;

use std::sync::Arc;

use thiserror::Error;

use crate::config::GeneratorBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `{summary, recommendations[]}` for a visit.
    VisitSummary,
    /// Structured note object from a voice transcript.
    TranscriptNote,
    /// Risk scores, insights and quality indicators for an OASIS assessment.
    AssessmentAnalysis,
    /// Free text for a care-team message.
    Message,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisitSummary => "visit_summary",
            Self::TranscriptNote => "transcript_note",
            Self::AssessmentAnalysis => "assessment_analysis",
            Self::Message => "message",
        }
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generator unavailable at {0}")]
    Unavailable(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Generator returned error (status {status}): {body}")]
    BackendError { status: u16, body: String },

    #[error("Malformed generator output: {0}")]
    Malformed(String),

    #[error("Missing context field: {0}")]
    MissingContext(&'static str),
}

/// Produces text for a kind of content from a JSON context.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, kind: ContentKind, context: &serde_json::Value) -> Result<String, GenerationError>;

    /// Whether `generate` may block on network I/O.
    fn is_remote(&self) -> bool {
        false
    }
}

pub fn build_generator(backend: &GeneratorBackend) -> Result<Arc<dyn ContentGenerator>, GenerationError> {
    match backend {
        GeneratorBackend::Template => Ok(Arc::new(TemplateGenerator)),
        GeneratorBackend::Ollama { base_url, model } => {
            tracing::info!(base_url = %base_url, model = %model, "Using Ollama content generator");
            Ok(Arc::new(OllamaGenerator::new(base_url, model, 120)?))
        }
    }
}

#[cfg(test)]
pub use mock::MockGenerator;

#[cfg(test)]
mod mock {
    use std::sync::Mutex;

    use super::{ContentGenerator, ContentKind, GenerationError};

    /// Mock generator for testing: returns a fixed response (or failure) and
    /// records every request it sees.
    pub struct MockGenerator {
        response: Result<String, String>,
        calls: Mutex<Vec<(ContentKind, serde_json::Value)>>,
    }

    impl MockGenerator {
        pub fn new(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                response: Err(reason.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(ContentKind, serde_json::Value)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl ContentGenerator for MockGenerator {
        fn generate(&self, kind: ContentKind, context: &serde_json::Value) -> Result<String, GenerationError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((kind, context.clone()));
            }
            self.response
                .clone()
                .map_err(GenerationError::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_backend_builds_local_generator() {
        let generator = build_generator(&GeneratorBackend::Template).unwrap();
        assert!(!generator.is_remote());
    }

    #[test]
    fn mock_records_calls() {
        let mock = MockGenerator::new("ok");
        let out = mock
            .generate(ContentKind::Message, &serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(mock.calls().len(), 1);
        assert!(MockGenerator::failing("down")
            .generate(ContentKind::Message, &serde_json::json!({}))
            .is_err());
    }
}
