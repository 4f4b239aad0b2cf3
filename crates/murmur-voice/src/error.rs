//! Error types for the murmur voice subsystem.
//!
//! Nothing here is fatal to the host process: stage and provider failures are
//! converted into `PipelineResult`s or log events at the boundary where they
//! occur, and the session stays alive for the next utterance.

use thiserror::Error;

/// Result type alias for voice operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice session pipeline.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("voice transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    /// A single provider attempt failed; non-fatal while a fallback remains.
    #[error("provider '{provider}' failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Every provider for the ASR stage failed.
    #[error("ASR stage failed: {0}")]
    Asr(String),

    /// Every provider for the LLM stage failed.
    #[error("LLM stage failed: {0}")]
    Llm(String),

    /// Every provider for the TTS stage failed (degrades to text-only).
    #[error("TTS stage failed: {0}")]
    Tts(String),

    /// A join was requested while the session limit is already reached.
    #[error("session limit reached; another session is active")]
    SessionConflict,

    #[error("playback error: {0}")]
    Playback(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
