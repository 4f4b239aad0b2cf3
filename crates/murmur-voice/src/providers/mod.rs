//! Concrete stage providers and the wiring from configuration to a pipeline.
//!
//! Each submodule implements one stage's provider trait for the endpoints the
//! deployment can name in its environment; `build_pipeline` assembles the
//! per-stage fallback chains in configured order.

pub mod asr;
pub mod llm;
pub mod tts;

pub use asr::{HostedWhisperAsr, PlaceholderAsr, SelfHostedAsr};
pub use llm::{OpenAiChat, PlaceholderChat};
pub use tts::{NeuralGatewayTts, PlaceholderTts, PremiumVoiceTts, SelfHostedTts};

use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::VoicePipeline;
use murmur_core::{AsrProviderSettings, TtsProviderSettings, VoiceSettings};

/// Build a pipeline with one provider per configured endpoint, preserving the
/// configured fallback order for every stage.
pub fn build_pipeline(settings: &VoiceSettings) -> VoiceResult<VoicePipeline> {
    settings
        .providers
        .validate()
        .map_err(|e| VoiceError::Config(e.to_string()))?;

    let mut pipeline = VoicePipeline::new(settings.pipeline.clone());
    for asr in &settings.providers.asr {
        match asr {
            AsrProviderSettings::SelfHosted { base_url } => pipeline.push_asr(Box::new(
                SelfHostedAsr::new(base_url, &settings.pipeline.language)?,
            )),
            AsrProviderSettings::Hosted {
                base_url,
                api_key,
                model,
            } => pipeline.push_asr(Box::new(HostedWhisperAsr::new(
                base_url,
                api_key,
                model,
                &settings.pipeline.language,
            )?)),
        }
    }
    for llm in &settings.providers.llm {
        pipeline.push_chat(Box::new(OpenAiChat::new(
            llm,
            settings.pipeline.max_tokens,
            settings.pipeline.temperature,
        )?));
    }
    for tts in &settings.providers.tts {
        match tts {
            TtsProviderSettings::Neural { base_url, voice } => {
                pipeline.push_tts(Box::new(NeuralGatewayTts::new(base_url, voice)?))
            }
            TtsProviderSettings::Premium {
                api_key,
                voice_id,
                model_id,
            } => pipeline.push_tts(Box::new(PremiumVoiceTts::new(api_key, voice_id, model_id)?)),
            TtsProviderSettings::SelfHosted { base_url, voice } => {
                pipeline.push_tts(Box::new(SelfHostedTts::new(base_url, voice)?))
            }
        }
    }
    Ok(pipeline)
}

pub(crate) fn http_client(timeout_secs: u64) -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| VoiceError::Config(format!("HTTP client init: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{LlmProviderSettings, ProviderConfig};

    #[test]
    fn build_fails_without_required_stages() {
        let settings = VoiceSettings::default();
        assert!(build_pipeline(&settings).is_err());
    }

    #[test]
    fn build_accepts_a_minimal_configuration() {
        let settings = VoiceSettings {
            providers: ProviderConfig {
                asr: vec![AsrProviderSettings::SelfHosted {
                    base_url: "http://localhost:5005".into(),
                }],
                llm: vec![LlmProviderSettings {
                    base_url: "http://localhost:8080/v1".into(),
                    api_key: None,
                    model: "local".into(),
                }],
                tts: Vec::new(),
            },
            ..VoiceSettings::default()
        };
        assert!(build_pipeline(&settings).is_ok());
    }
}
