//! LLM gateway for provider abstraction.
//!
//! Every role client speaks to the model through [`LlmGateway`]. The
//! production implementation talks to any OpenAI-compatible chat-completions
//! endpoint over HTTP; tests use [`ScriptedGateway`], which pops canned
//! responses in order and records the prompts it was given.

use common::{async_trait, Error, Result};
use config::LlmConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// LLM gateway trait: one chat completion per call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Gateway for OpenAI-compatible chat-completions endpoints.
pub struct HttpGateway {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ExternalService(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExternalService(format!(
                "LLM returned {}: {}",
                status,
                common::utils::truncate(&body, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalService(format!("malformed LLM response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::ExternalService("LLM response carried no choices".to_string()))
    }
}

/// Deterministic gateway for tests: pops pre-programmed responses in order
/// and records every prompt it receives.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response.
    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    /// Prompts received so far (user-role content, concatenated per call).
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn chat(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let prompt = messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().push(prompt);

        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Internal("scripted gateway exhausted".to_string()))
    }
}
