//! ASR stage providers: self-hosted recognizer and hosted Whisper-compatible
//! API. Both upload the canonical WAV as multipart and expect `{"text": ...}`
//! back.

use super::http_client;
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::AsrProvider;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const CLIENT_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
}

fn provider_err(name: &str, reason: impl ToString) -> VoiceError {
    VoiceError::Provider {
        provider: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Self-hosted recognition worker: `POST {base}/transcribe`, multipart
/// `audio_file` plus a `language` hint, no auth.
#[derive(Debug, Clone)]
pub struct SelfHostedAsr {
    base_url: String,
    language: String,
    client: reqwest::Client,
}

impl SelfHostedAsr {
    pub fn new(base_url: &str, language: &str) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }

    /// Hit the worker's health probe. Advisory only; the fallback chain is
    /// the real safety net.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(res) if res.status().is_success()
        )
    }
}

#[async_trait]
impl AsrProvider for SelfHostedAsr {
    fn name(&self) -> &str {
        "self-hosted-asr"
    }

    async fn transcribe(&self, wav: &[u8]) -> VoiceResult<String> {
        let url = format!("{}/transcribe", self.base_url);
        let part = Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| provider_err(self.name(), e))?;
        let form = Form::new()
            .part("audio_file", part)
            .text("language", self.language.clone());
        let res = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(provider_err(self.name(), format!("HTTP {status}: {body}")));
        }
        let parsed: TranscribeResponse =
            res.json().await.map_err(|e| provider_err(self.name(), e))?;
        Ok(parsed.text)
    }
}

/// Hosted speech API (OpenAI/Groq Whisper shape): multipart
/// `file/model/language/response_format=json` with bearer auth.
#[derive(Debug, Clone)]
pub struct HostedWhisperAsr {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    client: reqwest::Client,
}

impl HostedWhisperAsr {
    pub fn new(base_url: &str, api_key: &str, model: &str, language: &str) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            language: language.to_string(),
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }
}

#[async_trait]
impl AsrProvider for HostedWhisperAsr {
    fn name(&self) -> &str {
        "hosted-whisper"
    }

    async fn transcribe(&self, wav: &[u8]) -> VoiceResult<String> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let part = Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| provider_err(self.name(), e))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(provider_err(self.name(), format!("HTTP {status}: {body}")));
        }
        let parsed: TranscribeResponse =
            res.json().await.map_err(|e| provider_err(self.name(), e))?;
        Ok(parsed.text)
    }
}

/// Fixed-transcript ASR for exercising the loop without a recognizer.
#[derive(Debug, Default)]
pub struct PlaceholderAsr {
    pub transcript: String,
}

impl PlaceholderAsr {
    pub fn with_transcript(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

#[async_trait]
impl AsrProvider for PlaceholderAsr {
    fn name(&self) -> &str {
        "placeholder-asr"
    }

    async fn transcribe(&self, _wav: &[u8]) -> VoiceResult<String> {
        Ok(self.transcript.clone())
    }
}
