//! Ollama chat client implementing [`TextTransform`]

use super::error::StageError;
use super::{TextTransform, TransformRequest};
use crate::config::OllamaConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Openings that mark a model refusing the request
const REFUSAL_PREFIXES: &[&str] = &[
    "i can't",
    "i cannot",
    "i won't",
    "i'm sorry, but",
    "i am sorry, but",
    "i'm not able to",
    "as an ai",
];

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

pub struct OllamaClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextTransform for OllamaClient {
    async fn transform(&self, request: TransformRequest) -> Result<String, StageError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.endpoint);
        debug!(url = %url, model = %self.model, "Calling language model");

        let response = self.http_client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, detail));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::Malformed(format!("Ollama response: {}", e)))?;
        let content = reply.message.content.trim().to_string();

        if content.is_empty() {
            return Err(StageError::Malformed("empty completion".to_string()));
        }
        if is_refusal(&content) {
            return Err(StageError::ContentRejected(first_line(&content)));
        }
        Ok(content)
    }
}

fn classify_status(status: StatusCode, detail: String) -> StageError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StageError::RateLimited,
        s if s.is_server_error() => StageError::Network(format!("Ollama returned {}: {}", s, detail)),
        s => StageError::InvalidInput(format!("Ollama returned {}: {}", s, detail)),
    }
}

fn is_refusal(content: &str) -> bool {
    let lower = content.trim_start().to_lowercase().replace('\u{2019}', "'");
    REFUSAL_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn first_line(content: &str) -> String {
    content.lines().next().unwrap_or_default().chars().take(200).collect()
}
