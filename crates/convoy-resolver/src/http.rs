//! HTTP primary backend.
//!
//! Speaks the minimal completion contract the core requires: POST the
//! query and recent history, get `{content, confidence}` back. Works
//! against the platform's AI gateway or any endpoint implementing the
//! same shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use convoy_core::{Message, SenderRole};

use crate::backend::{AiBackend, CompleteOptions, Completion};
use crate::error::{ResolverError, ResolverResult};

/// Primary reasoning backend over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl HttpBackend {
    /// Build a backend for `base_url` and `model`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    fn build_request(&self, query: &str, history: &[Message], options: &CompleteOptions) -> serde_json::Value {
        let history: Vec<_> = history
            .iter()
            .map(|m| {
                json!({
                    "role": match m.sender {
                        SenderRole::Customer => "user",
                        SenderRole::Ai | SenderRole::Operator => "assistant",
                        SenderRole::System => "system",
                    },
                    "content": m.content,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "query": query,
            "history": history,
            "options": {
                "timeout": options.timeout.as_secs(),
                "temperature": options.temperature,
            },
        })
    }
}

#[async_trait]
impl AiBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(
        &self,
        query: &str,
        history: &[Message],
        options: &CompleteOptions,
    ) -> ResolverResult<Completion> {
        let body = self.build_request(query, history, options);
        debug!(model = %self.model, history_len = history.len(), "Primary AI call");

        let mut request = self
            .client
            .post(format!("{}/complete", self.base_url.trim_end_matches('/')))
            .timeout(options.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ResolverError::Backend(format!(
                "status {}",
                response.status()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::Backend(format!("bad completion payload: {e}")))?;

        Ok(Completion {
            content: parsed.content,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }

    async fn upload(&self, title: &str, content: &str, tags: &[String]) -> ResolverResult<i64> {
        let mut request = self
            .client
            .post(format!("{}/documents", self.base_url.trim_end_matches('/')))
            .json(&json!({"title": title, "content": content, "tags": tags}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ResolverError::Backend(format!(
                "upload status {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct UploadResponse {
            doc_id: i64,
        }
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::Backend(format!("bad upload payload: {e}")))?;
        Ok(parsed.doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use convoy_core::{MessageId, MessageKind, SessionId};

    #[test]
    fn request_maps_roles_and_options() {
        let backend = HttpBackend::new("http://ai.internal", None, "support-1");
        let history = vec![Message {
            id: MessageId(1),
            session: SessionId::new(),
            content: "hi".into(),
            kind: MessageKind::Text,
            sender: SenderRole::Customer,
            created_at: Utc::now(),
        }];
        let options = CompleteOptions {
            timeout: std::time::Duration::from_secs(10),
            temperature: 0.3,
        };

        let body = backend.build_request("reset password", &history, &options);
        assert_eq!(body["model"], "support-1");
        assert_eq!(body["history"][0]["role"], "user");
        assert_eq!(body["options"]["timeout"], 10);
        assert_eq!(body["options"]["temperature"], 0.3);
    }

    #[test]
    fn confidence_defaults_when_absent() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"content": "hello"}"#).unwrap();
        assert!((parsed.confidence - 0.5).abs() < f64::EPSILON);
    }
}
