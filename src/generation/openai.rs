use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::build_policy_prompt;

pub const MISSING_KEY_MESSAGE: &str = "OPENAI_API_KEY not set.";

const SYSTEM_PROMPT: &str = "Be concise and factual.";
const TEMPERATURE: f32 = 0.2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completion client for OpenAI-compatible providers.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build chat-completion http client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    /// Answers `question` from `context`. Without an API key nothing is
    /// sent and the fixed missing-key message is returned as the answer.
    pub async fn answer(&self, question: &str, context: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("chat-completion backend selected without OPENAI_API_KEY");
            return Ok(MISSING_KEY_MESSAGE.to_string());
        };

        let prompt = build_policy_prompt(question, context);
        let request = chat_request(&self.model, &prompt);

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("failed to call chat-completion endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "chat-completion endpoint returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<ChatResponse>()
            .await
            .context("failed to decode chat-completion response")?;

        first_choice_text(response)
    }
}

fn chat_request<'a>(model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        temperature: TEMPERATURE,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
    }
}

fn first_choice_text(response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("chat-completion response had no choices"))?;

    Ok(choice.message.content.unwrap_or_default().trim().to_string())
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.pointer("/error/message").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
