//! Run one synthetic utterance through the configured provider chains.
//!
//! Expects the `MURMUR_*` endpoint variables in the environment (or a `.env`
//! file); prints the transcript, the reply, and whether audio came back.

use murmur_core::VoiceSettings;
use murmur_voice::build_pipeline;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = VoiceSettings::from_env();
    let pipeline = build_pipeline(&settings)?;

    // One second of silence; enough for the wire formats to be exercised.
    let pcm = vec![0u8; 48_000 * 2 * 2];
    let result = pipeline.process(&pcm).await;

    info!(
        success = result.success,
        transcript = result.transcript.as_deref().unwrap_or(""),
        reply = result.response_text.as_deref().unwrap_or(""),
        audio_bytes = result.audio.as_ref().map(Vec::len).unwrap_or(0),
        "pipeline finished"
    );
    Ok(())
}
