//! TTS stage providers. Three wire shapes, one contract: text in, playable
//! audio bytes out. The chain runs neural gateway, then the premium hosted
//! voice, then the self-hosted worker, in whatever order configuration lists
//! them.

use super::http_client;
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::TtsProvider;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

const CLIENT_TIMEOUT_SECS: u64 = 30;

const PREMIUM_API_BASE: &str = "https://api.elevenlabs.io/v1";

fn provider_err(name: &str, reason: impl ToString) -> VoiceError {
    VoiceError::Provider {
        provider: name.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Neural synthesis gateway: `POST {base}/synthesize` with `{text, voice}`,
/// audio comes back as the raw response body.
#[derive(Debug, Clone)]
pub struct NeuralGatewayTts {
    base_url: String,
    voice: String,
    client: reqwest::Client,
}

impl NeuralGatewayTts {
    pub fn new(base_url: &str, voice: &str) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }
}

#[async_trait]
impl TtsProvider for NeuralGatewayTts {
    fn name(&self) -> &str {
        "neural-gateway"
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!("{}/synthesize", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&GatewayRequest {
                text,
                voice: &self.voice,
            })
            .send()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(provider_err(self.name(), format!("HTTP {status}: {body}")));
        }
        let audio = res
            .bytes()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if audio.is_empty() {
            return Err(provider_err(self.name(), "empty audio body"));
        }
        Ok(audio.to_vec())
    }
}

#[derive(Serialize)]
struct PremiumRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Hosted premium voice API, ElevenLabs wire shape: voice id in the path,
/// `xi-api-key` header, binary audio response.
#[derive(Debug, Clone)]
pub struct PremiumVoiceTts {
    api_key: String,
    voice_id: String,
    model_id: String,
    client: reqwest::Client,
}

impl PremiumVoiceTts {
    pub fn new(api_key: &str, voice_id: &str, model_id: &str) -> VoiceResult<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
            model_id: model_id.to_string(),
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }
}

#[async_trait]
impl TtsProvider for PremiumVoiceTts {
    fn name(&self) -> &str {
        "premium-voice"
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!("{}/text-to-speech/{}", PREMIUM_API_BASE, self.voice_id);
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&PremiumRequest {
                text,
                model_id: &self.model_id,
            })
            .send()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(provider_err(self.name(), format!("HTTP {status}: {body}")));
        }
        let audio = res
            .bytes()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if audio.is_empty() {
            return Err(provider_err(self.name(), "empty audio body"));
        }
        Ok(audio.to_vec())
    }
}

#[derive(Deserialize)]
struct SelfHostedResponse {
    audio: String,
}

/// Self-hosted synthesis worker: `POST {base}/api/tts` with `{text, voice}`,
/// audio comes back base64-encoded in a JSON envelope.
#[derive(Debug, Clone)]
pub struct SelfHostedTts {
    base_url: String,
    voice: String,
    client: reqwest::Client,
}

impl SelfHostedTts {
    pub fn new(base_url: &str, voice: &str) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
            client: http_client(CLIENT_TIMEOUT_SECS)?,
        })
    }
}

#[async_trait]
impl TtsProvider for SelfHostedTts {
    fn name(&self) -> &str {
        "self-hosted-tts"
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!("{}/api/tts", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&GatewayRequest {
                text,
                voice: &self.voice,
            })
            .send()
            .await
            .map_err(|e| provider_err(self.name(), e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(provider_err(self.name(), format!("HTTP {status}: {body}")));
        }
        let parsed: SelfHostedResponse =
            res.json().await.map_err(|e| provider_err(self.name(), e))?;
        let audio = BASE64
            .decode(parsed.audio.as_bytes())
            .map_err(|e| provider_err(self.name(), format!("base64 audio: {e}")))?;
        if audio.is_empty() {
            return Err(provider_err(self.name(), "empty audio body"));
        }
        Ok(audio)
    }
}

/// Synthesis backend that produces a fixed payload, for wiring tests.
#[derive(Debug, Default)]
pub struct PlaceholderTts {
    pub audio: Vec<u8>,
}

impl PlaceholderTts {
    pub fn with_audio(audio: Vec<u8>) -> Self {
        Self { audio }
    }
}

#[async_trait]
impl TtsProvider for PlaceholderTts {
    fn name(&self) -> &str {
        "placeholder-tts"
    }

    async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(self.audio.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_request_serializes_text_and_voice() {
        let json = serde_json::to_value(GatewayRequest {
            text: "hello",
            voice: "en_US-amy",
        })
        .unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["voice"], "en_US-amy");
    }

    #[test]
    fn self_hosted_response_decodes_base64_audio() {
        let parsed: SelfHostedResponse =
            serde_json::from_str(r#"{"audio": "UklGRg==", "sample_rate": 22050}"#).unwrap();
        let audio = BASE64.decode(parsed.audio.as_bytes()).unwrap();
        assert_eq!(audio, b"RIFF");
    }

    #[test]
    fn premium_url_embeds_the_voice_id() {
        let tts = PremiumVoiceTts::new("key", "pNInz6obpgDQGcFmaJgB", "eleven_turbo_v2").unwrap();
        let url = format!("{}/text-to-speech/{}", PREMIUM_API_BASE, tts.voice_id);
        assert_eq!(
            url,
            "https://api.elevenlabs.io/v1/text-to-speech/pNInz6obpgDQGcFmaJgB"
        );
    }

    #[tokio::test]
    async fn placeholder_returns_the_configured_audio() {
        let tts = PlaceholderTts::with_audio(vec![1, 2, 3]);
        assert_eq!(tts.synthesize("hi").await.unwrap(), vec![1, 2, 3]);
    }
}
