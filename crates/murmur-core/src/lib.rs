//! # Murmur Core — shared configuration for the voice pipeline
//!
//! Everything the voice subsystem needs to know before a session starts lives
//! here: capture tuning, pipeline tuning, and the per-stage provider lists.
//! Configuration is read from the environment exactly once, frozen, and shared
//! read-only across sessions (`Arc<VoiceSettings>`); no call site re-reads env.

pub mod config;

pub use config::{
    AsrProviderSettings, CaptureSettings, ConfigError, LlmProviderSettings, PipelineSettings,
    ProviderConfig, TtsProviderSettings, VoiceSettings,
};
