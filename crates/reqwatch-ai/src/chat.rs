//! OpenAI-compatible chat-completions generator.

use async_trait::async_trait;
use reqwatch_core::{ArtifactKind, DraftArtifact, RequirementSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ArtifactGenerator, ChatMessage, GenerateError, build_messages, parse_artifacts};

/// Generator backed by a `POST {endpoint}/chat/completions` API.
pub struct ChatGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatGenerator {
    /// `endpoint` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: None,
            model,
            temperature: 0.3,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerateError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!(url = %url, model = %self.model, "requesting completion");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerateError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = resp.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(GenerateError::EmptyResponse)
    }
}

#[async_trait]
impl ArtifactGenerator for ChatGenerator {
    async fn generate(
        &self,
        requirement: &RequirementSnapshot,
        kind: ArtifactKind,
    ) -> Result<Vec<DraftArtifact>, GenerateError> {
        let messages = build_messages(requirement, kind);
        let content = self.complete(&messages).await?;
        let drafts = parse_artifacts(&content, kind)?;
        info!(
            requirement_id = %requirement.requirement_id,
            kind = %kind,
            count = drafts.len(),
            "generated artifacts"
        );
        Ok(drafts)
    }
}
