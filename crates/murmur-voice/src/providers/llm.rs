//! LLM stage provider: OpenAI-compatible chat completion (self-hosted llama
//! servers, Groq, OpenRouter — anything speaking `/chat/completions`).

use super::http_client;
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::ChatProvider;
use async_trait::async_trait;
use murmur_core::LlmProviderSettings;
use serde::{Deserialize, Serialize};

const CLIENT_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// One OpenAI-compatible chat endpoint. Bearer auth is optional so local
/// llama.cpp-style servers work without a key.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(
        settings: &LlmProviderSettings,
        max_tokens: u32,
        temperature: f32,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens,
            temperature,
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }

    fn err(&self, reason: impl ToString) -> VoiceError {
        VoiceError::Provider {
            provider: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn respond(&self, system: &str, transcript: &str) -> VoiceResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: transcript.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await.map_err(|e| self.err(e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(self.err(format!("HTTP {status}: {body}")));
        }
        let parsed: ChatResponse = res.json().await.map_err(|e| self.err(e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| self.err("response contained no choices"))
    }
}

/// Fixed-reply chat backend for exercising the loop without a model.
#[derive(Debug, Default)]
pub struct PlaceholderChat {
    pub reply: String,
}

impl PlaceholderChat {
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for PlaceholderChat {
    fn name(&self) -> &str {
        "placeholder-chat"
    }

    async fn respond(&self, _system: &str, _transcript: &str) -> VoiceResult<String> {
        Ok(self.reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_the_openai_shape() {
        let body = ChatRequest {
            model: "llama-3.1-8b-instant".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            max_tokens: 256,
            temperature: 0.5,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_parses_first_choice_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content, "Hello!");
    }

    #[tokio::test]
    async fn placeholder_returns_the_configured_reply() {
        let chat = PlaceholderChat::with_reply("sure thing");
        assert_eq!(chat.respond("sys", "user").await.unwrap(), "sure thing");
    }
}
