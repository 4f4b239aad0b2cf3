//! Voice pipeline configuration loaded from the environment.
//!
//! One immutable `VoiceSettings` is built at startup via `from_env()` and
//! injected everywhere; providers are an *ordered* list per stage, and the
//! order in these vecs is the fallback order the orchestrator tries.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Raised when the environment describes an unusable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_silence_ms() -> u64 {
    2000
}

fn default_min_frame_bytes() -> usize {
    64
}

fn default_min_packet_count() -> usize {
    10
}

fn default_max_buffer_frames() -> usize {
    1000
}

/// Utterance segmentation tuning.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | MURMUR_SILENCE_MS | 2000 | Silence after the last accepted frame before finalize. |
/// | MURMUR_MIN_FRAME_BYTES | 64 | Frames smaller than this are treated as noise. |
/// | MURMUR_MIN_PACKET_COUNT | 10 | Finalized buffers with fewer frames are discarded. |
/// | MURMUR_MAX_BUFFER_FRAMES | 1000 | Hard buffer cap (~20s of 20ms frames); reaching it finalizes immediately. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: usize,
    #[serde(default = "default_min_packet_count")]
    pub min_packet_count: usize,
    #[serde(default = "default_max_buffer_frames")]
    pub max_buffer_frames: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            min_frame_bytes: default_min_frame_bytes(),
            min_packet_count: default_min_packet_count(),
            max_buffer_frames: default_max_buffer_frames(),
        }
    }
}

impl CaptureSettings {
    pub fn from_env() -> Self {
        Self {
            silence_ms: env_u64("MURMUR_SILENCE_MS", default_silence_ms()),
            min_frame_bytes: env_usize("MURMUR_MIN_FRAME_BYTES", default_min_frame_bytes()),
            min_packet_count: env_usize("MURMUR_MIN_PACKET_COUNT", default_min_packet_count()),
            max_buffer_frames: env_usize("MURMUR_MAX_BUFFER_FRAMES", default_max_buffer_frames()),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    15
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.5
}

fn default_language() -> String {
    "en".to_string()
}

fn default_system_prompt() -> String {
    "You are a voice assistant in a live voice channel. Answer briefly and \
     conversationally; your reply will be read aloud."
        .to_string()
}

fn default_fallback_reply() -> String {
    "Okay.".to_string()
}

/// Orchestrator tuning.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | MURMUR_STAGE_TIMEOUT_SECS | 15 | Bound on every external provider call. |
/// | MURMUR_MAX_TOKENS | 256 | LLM completion budget. |
/// | MURMUR_TEMPERATURE | 0.5 | LLM sampling temperature. |
/// | MURMUR_LANGUAGE | en | Language hint forwarded to ASR providers. |
/// | MURMUR_SYSTEM_PROMPT | (built-in) | System instruction for the LLM stage. |
/// | MURMUR_FALLBACK_REPLY | "Okay." | Spoken when the LLM returns an empty reply. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            language: default_language(),
            system_prompt: default_system_prompt(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        Self {
            stage_timeout_secs: env_u64("MURMUR_STAGE_TIMEOUT_SECS", default_stage_timeout_secs()),
            max_tokens: env_u64("MURMUR_MAX_TOKENS", default_max_tokens() as u64) as u32,
            temperature: env_f32("MURMUR_TEMPERATURE", default_temperature()),
            language: env_string("MURMUR_LANGUAGE", default_language()),
            system_prompt: env_string("MURMUR_SYSTEM_PROMPT", default_system_prompt()),
            fallback_reply: env_string("MURMUR_FALLBACK_REPLY", default_fallback_reply()),
        }
    }
}

/// One ASR endpoint. Order in `ProviderConfig::asr` is fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AsrProviderSettings {
    /// Self-hosted recognizer: `POST {base_url}/transcribe`, no auth.
    SelfHosted { base_url: String },
    /// Hosted Whisper-compatible API: `POST {base_url}/audio/transcriptions`, bearer auth.
    Hosted {
        base_url: String,
        api_key: String,
        model: String,
    },
}

/// One OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// One TTS endpoint. Order in `ProviderConfig::tts` is fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TtsProviderSettings {
    /// Hosted neural-voice gateway returning raw audio bytes.
    Neural { base_url: String, voice: String },
    /// Premium hosted voice API (ElevenLabs-shaped), binary body, `xi-api-key` auth.
    Premium {
        api_key: String,
        voice_id: String,
        model_id: String,
    },
    /// Self-hosted synthesizer returning JSON with base64 audio.
    SelfHosted { base_url: String, voice: String },
}

/// Per-stage ordered provider lists. Immutable; loaded once and shared
/// read-only across sessions.
///
/// | Env | Provider |
/// |-----|----------|
/// | MURMUR_ASR_URL | Self-hosted recognizer (tried first when set). |
/// | MURMUR_ASR_API_KEY / MURMUR_ASR_API_URL / MURMUR_ASR_MODEL | Hosted Whisper API fallback. |
/// | MURMUR_LLM_API_URL / MURMUR_LLM_API_KEY / MURMUR_LLM_MODEL | Primary chat endpoint. |
/// | MURMUR_LLM_FALLBACK_URL / _KEY / _MODEL | Optional secondary chat endpoint. |
/// | MURMUR_TTS_NEURAL_URL / MURMUR_TTS_NEURAL_VOICE | Free neural gateway (tried first). |
/// | MURMUR_TTS_PREMIUM_KEY / _VOICE / _MODEL | Premium voice API. |
/// | MURMUR_TTS_URL / MURMUR_TTS_VOICE | Self-hosted synthesizer (last resort). |
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub asr: Vec<AsrProviderSettings>,
    pub llm: Vec<LlmProviderSettings>,
    pub tts: Vec<TtsProviderSettings>,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let mut asr = Vec::new();
        if let Some(url) = env_opt_string("MURMUR_ASR_URL") {
            asr.push(AsrProviderSettings::SelfHosted { base_url: url });
        }
        if let Some(key) = env_opt_string("MURMUR_ASR_API_KEY") {
            asr.push(AsrProviderSettings::Hosted {
                base_url: env_string(
                    "MURMUR_ASR_API_URL",
                    "https://api.groq.com/openai/v1".to_string(),
                ),
                api_key: key,
                model: env_string("MURMUR_ASR_MODEL", "whisper-large-v3".to_string()),
            });
        }

        let mut llm = Vec::new();
        if let Some(url) = env_opt_string("MURMUR_LLM_API_URL") {
            llm.push(LlmProviderSettings {
                base_url: url,
                api_key: env_opt_string("MURMUR_LLM_API_KEY"),
                model: env_string("MURMUR_LLM_MODEL", "llama-3.1-8b-instant".to_string()),
            });
        }
        if let Some(url) = env_opt_string("MURMUR_LLM_FALLBACK_URL") {
            llm.push(LlmProviderSettings {
                base_url: url,
                api_key: env_opt_string("MURMUR_LLM_FALLBACK_KEY"),
                model: env_string(
                    "MURMUR_LLM_FALLBACK_MODEL",
                    "llama-3.1-8b-instant".to_string(),
                ),
            });
        }

        let mut tts = Vec::new();
        if let Some(url) = env_opt_string("MURMUR_TTS_NEURAL_URL") {
            tts.push(TtsProviderSettings::Neural {
                base_url: url,
                voice: env_string("MURMUR_TTS_NEURAL_VOICE", "en-US-AriaNeural".to_string()),
            });
        }
        if let Some(key) = env_opt_string("MURMUR_TTS_PREMIUM_KEY") {
            tts.push(TtsProviderSettings::Premium {
                api_key: key,
                voice_id: env_string("MURMUR_TTS_PREMIUM_VOICE", "Rachel".to_string()),
                model_id: env_string("MURMUR_TTS_PREMIUM_MODEL", "eleven_turbo_v2_5".to_string()),
            });
        }
        if let Some(url) = env_opt_string("MURMUR_TTS_URL") {
            tts.push(TtsProviderSettings::SelfHosted {
                base_url: url,
                voice: env_string("MURMUR_TTS_VOICE", "default".to_string()),
            });
        }

        Self { asr, llm, tts }
    }

    /// A turn cannot produce a transcript or a reply without these stages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asr.is_empty() {
            return Err(ConfigError::Invalid(
                "no ASR provider configured (set MURMUR_ASR_URL or MURMUR_ASR_API_KEY)".into(),
            ));
        }
        if self.llm.is_empty() {
            return Err(ConfigError::Invalid(
                "no LLM provider configured (set MURMUR_LLM_API_URL)".into(),
            ));
        }
        // TTS may be empty: the pipeline degrades to text-only results.
        Ok(())
    }
}

fn default_max_sessions() -> usize {
    1
}

/// Aggregate settings for the whole voice subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub providers: ProviderConfig,
    /// MURMUR_MAX_SESSIONS: concurrent session cap. Default 1 (single-tenant,
    /// matching the original deployment); raise for multi-user voice.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            pipeline: PipelineSettings::default(),
            providers: ProviderConfig::default(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl VoiceSettings {
    /// Load everything from the environment. Unset or unparsable values fall
    /// back to the defaults documented on each struct.
    pub fn from_env() -> Self {
        let settings = Self {
            capture: CaptureSettings::from_env(),
            pipeline: PipelineSettings::from_env(),
            providers: ProviderConfig::from_env(),
            max_sessions: env_usize("MURMUR_MAX_SESSIONS", default_max_sessions()).max(1),
        };
        debug!(
            asr = settings.providers.asr.len(),
            llm = settings.providers.llm.len(),
            tts = settings.providers.tts.len(),
            max_sessions = settings.max_sessions,
            "voice settings loaded from environment"
        );
        settings
    }
}

fn env_string(name: &str, default: String) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
