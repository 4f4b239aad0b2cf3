//! # Murmur Voice - Conversational Voice Sessions
//!
//! This crate turns one user's live voice track into spoken replies: silence-
//! segmented utterance capture, an ASR → LLM → TTS pipeline with per-stage
//! provider fallback, and playback with echo suppression.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Voice Session (per user)                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Transport   │→ │ Opus Decoder │→ │  Segmenter   │       │
//! │  │   (events)   │  │  (audiopus)  │  │ (2s silence) │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↑                                      ↓             │
//! │  ┌──────────────┐                    ┌──────────────┐       │
//! │  │   Playback   │←───────────────────│   Pipeline   │       │
//! │  │ (echo guard) │   synthesized WAV  │ ASR→LLM→TTS  │       │
//! │  └──────────────┘                    └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod providers;
pub mod segment;
pub mod session;
pub mod transport;

pub use codec::{parse_wav, pcm_to_opus, pcm_to_wav, OpusDecoder, WavSpec};
pub use error::{VoiceError, VoiceResult};
pub use pipeline::{
    strip_reasoning, AsrProvider, ChatProvider, PipelineResult, TtsProvider, VoicePipeline,
};
pub use playback::PlaybackController;
pub use providers::{
    build_pipeline, HostedWhisperAsr, NeuralGatewayTts, OpenAiChat, PlaceholderAsr,
    PlaceholderChat, PlaceholderTts, PremiumVoiceTts, SelfHostedAsr, SelfHostedTts,
};
pub use segment::{CaptureState, FinalizeReason, FrameOutcome, Utterance, UtteranceSegmenter};
pub use session::VoiceSessionManager;
pub use transport::{
    ChannelId, PlayerState, TrackPlayer, TransportEvent, UserId, VoiceConnection, VoiceTransport,
};
