//! **Pipeline Orchestrator** — drives one utterance through ASR → LLM → TTS.
//!
//! Stages run strictly sequentially. Each stage holds an *ordered* list of
//! interchangeable providers tried until one succeeds; a single provider
//! failing is non-fatal while a fallback remains. ASR or LLM exhausting the
//! chain aborts the turn; TTS exhausting the chain only degrades the result
//! to text-only. Every provider attempt is bounded by the configured stage
//! timeout — a hung endpoint can never wedge a session.

use crate::codec::{pcm_to_wav, WavSpec};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use murmur_core::PipelineSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one utterance. `success` requires only that a transcript and a
/// reply were produced; missing audio means every TTS provider failed and the
/// caller should fall back to posting the text.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub success: bool,
    pub transcript: Option<String>,
    pub response_text: Option<String>,
    pub audio: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl PipelineResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Speech recognition over a canonical WAV payload.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn transcribe(&self, wav: &[u8]) -> VoiceResult<String>;
}

/// Chat completion: system instruction plus the user transcript.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn respond(&self, system: &str, transcript: &str) -> VoiceResult<String>;
}

/// Text-to-speech; implementations normalize whatever the upstream returns
/// (raw body, JSON base64) into one byte buffer.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Remove a reasoning-trace block from model output: everything through the
/// end marker is dropped, only content after it is kept. An opened but
/// unterminated block yields nothing speakable.
pub fn strip_reasoning(text: &str) -> String {
    const START: &str = "<think>";
    const END: &str = "</think>";
    if let Some(pos) = text.find(END) {
        text[pos + END.len()..].trim().to_string()
    } else if text.contains(START) {
        String::new()
    } else {
        text.trim().to_string()
    }
}

pub struct VoicePipeline {
    asr: Vec<Box<dyn AsrProvider>>,
    chat: Vec<Box<dyn ChatProvider>>,
    tts: Vec<Box<dyn TtsProvider>>,
    settings: PipelineSettings,
    wav_spec: WavSpec,
}

impl VoicePipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            asr: Vec::new(),
            chat: Vec::new(),
            tts: Vec::new(),
            settings,
            wav_spec: WavSpec::default(),
        }
    }

    pub fn with_wav_spec(mut self, spec: WavSpec) -> Self {
        self.wav_spec = spec;
        self
    }

    /// Append a provider to a stage's fallback chain (first added = first tried).
    pub fn push_asr(&mut self, provider: Box<dyn AsrProvider>) {
        self.asr.push(provider);
    }

    pub fn push_chat(&mut self, provider: Box<dyn ChatProvider>) {
        self.chat.push(provider);
    }

    pub fn push_tts(&mut self, provider: Box<dyn TtsProvider>) {
        self.tts.push(provider);
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stage_timeout_secs)
    }

    /// Drive one finalized utterance through all three stages.
    pub async fn process(&self, pcm: &[u8]) -> PipelineResult {
        let wav = pcm_to_wav(pcm, self.wav_spec);

        // ASR: chain exhaustion aborts the turn with no audible response
        // (the trigger was ambient speech, not an acknowledged command).
        let transcript = match self.run_asr(&wav).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "turn aborted: ASR stage failed");
                return PipelineResult::failure(e.to_string());
            }
        };
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            debug!("turn aborted: recognizer produced an empty transcript");
            return PipelineResult::failure("ASR produced an empty transcript");
        }
        info!(transcript = %transcript, "utterance transcribed");

        // LLM: failure aborts the turn, but the transcript is still returned.
        let reply = match self.run_chat(&transcript).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "turn aborted: LLM stage failed");
                return PipelineResult {
                    transcript: Some(transcript),
                    error: Some(e.to_string()),
                    ..PipelineResult::default()
                };
            }
        };
        let reply = strip_reasoning(&reply);
        let reply = if reply.is_empty() {
            // The model occasionally streams nothing; speak a canned
            // acknowledgement rather than going silent.
            debug!("LLM returned an empty reply; using fallback line");
            self.settings.fallback_reply.clone()
        } else {
            reply
        };

        // TTS: all providers failing is not an error — text-only result.
        let audio = match self.run_tts(&reply).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "TTS stage failed; degrading to text-only result");
                None
            }
        };

        PipelineResult {
            success: true,
            transcript: Some(transcript),
            response_text: Some(reply),
            audio,
            error: None,
        }
    }

    async fn run_asr(&self, wav: &[u8]) -> VoiceResult<String> {
        let timeout = self.stage_timeout();
        for provider in &self.asr {
            let started = Instant::now();
            match bounded(timeout, provider.name(), provider.transcribe(wav)).await {
                Ok(text) => {
                    info!(
                        provider = provider.name(),
                        latency_ms = started.elapsed().as_millis() as u64,
                        "ASR attempt succeeded"
                    );
                    return Ok(text);
                }
                Err(e) => warn!(
                    provider = provider.name(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "ASR attempt failed; trying next provider"
                ),
            }
        }
        Err(VoiceError::Asr("all providers failed".into()))
    }

    async fn run_chat(&self, transcript: &str) -> VoiceResult<String> {
        let timeout = self.stage_timeout();
        for provider in &self.chat {
            let started = Instant::now();
            match bounded(
                timeout,
                provider.name(),
                provider.respond(&self.settings.system_prompt, transcript),
            )
            .await
            {
                Ok(text) => {
                    info!(
                        provider = provider.name(),
                        latency_ms = started.elapsed().as_millis() as u64,
                        "LLM attempt succeeded"
                    );
                    return Ok(text);
                }
                Err(e) => warn!(
                    provider = provider.name(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "LLM attempt failed; trying next provider"
                ),
            }
        }
        Err(VoiceError::Llm("all providers failed".into()))
    }

    async fn run_tts(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let timeout = self.stage_timeout();
        for provider in &self.tts {
            let started = Instant::now();
            match bounded(timeout, provider.name(), provider.synthesize(text)).await {
                Ok(bytes) if !bytes.is_empty() => {
                    info!(
                        provider = provider.name(),
                        latency_ms = started.elapsed().as_millis() as u64,
                        audio_bytes = bytes.len(),
                        "TTS attempt succeeded"
                    );
                    return Ok(bytes);
                }
                Ok(_) => warn!(
                    provider = provider.name(),
                    "TTS attempt returned no audio; trying next provider"
                ),
                Err(e) => warn!(
                    provider = provider.name(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "TTS attempt failed; trying next provider"
                ),
            }
        }
        Err(VoiceError::Tts("all providers failed".into()))
    }
}

/// Bound one provider attempt; a timeout counts as that provider failing.
async fn bounded<T>(
    timeout: Duration,
    provider: &str,
    fut: impl std::future::Future<Output = VoiceResult<T>>,
) -> VoiceResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(VoiceError::Provider {
            provider: provider.to_string(),
            reason: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}
