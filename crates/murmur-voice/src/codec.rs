//! **Format Converter** — stateless codec and framing utilities.
//!
//! PCM↔WAV framing is done in-process (44-byte canonical header, no external
//! dependency). Opus→PCM is a real libopus decode of fixed-size voice frames.
//! The optional PCM→Opus outbound path shells out to ffmpeg with a fixed
//! argument set and piped stdio.

use crate::error::{VoiceError, VoiceResult};
use audiopus::coder::Decoder as OpusInner;
use audiopus::{Channels, SampleRate};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Sample rate of the voice transport's Opus frames.
pub const SAMPLE_RATE: u32 = 48_000;
/// Channel count of the voice transport's Opus frames.
pub const CHANNELS: u16 = 2;
/// Samples per channel in one 20ms Opus frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;
/// Canonical RIFF/fmt/data header length.
pub const WAV_HEADER_LEN: usize = 44;

/// Sample format of a PCM byte buffer (always 16-bit signed little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bits_per_sample: 16,
        }
    }
}

/// Wrap raw PCM in a canonical WAV container: 44-byte RIFF/fmt/data header
/// followed by the samples, unmodified. Deterministic; output length is
/// always `44 + pcm.len()`.
pub fn pcm_to_wav(pcm: &[u8], spec: WavSpec) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = spec.sample_rate * spec.channels as u32 * (spec.bits_per_sample as u32 / 8);
    let block_align = spec.channels * (spec.bits_per_sample / 8);

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&spec.channels.to_le_bytes());
    buf.extend_from_slice(&spec.sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&spec.bits_per_sample.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(pcm);
    buf
}

/// Parse a WAV container, returning its format and a view of the sample data.
/// Walks the chunk list, so extra chunks (LIST, fact) between fmt and data are
/// tolerated.
pub fn parse_wav(bytes: &[u8]) -> VoiceResult<(WavSpec, &[u8])> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(VoiceError::Codec("not a RIFF/WAVE container".into()));
    }
    let mut spec: Option<WavSpec> = None;
    let mut data: Option<&[u8]> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body_start = pos + 8;
        let body_end = body_start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| VoiceError::Codec("truncated WAV chunk".into()))?;
        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(VoiceError::Codec("fmt chunk too short".into()));
                }
                let fmt = &bytes[body_start..body_end];
                let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
                if audio_format != 1 {
                    return Err(VoiceError::Codec(format!(
                        "unsupported WAV audio format {audio_format} (want PCM)"
                    )));
                }
                spec = Some(WavSpec {
                    channels: u16::from_le_bytes([fmt[2], fmt[3]]),
                    sample_rate: u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]),
                    bits_per_sample: u16::from_le_bytes([fmt[14], fmt[15]]),
                });
            }
            b"data" => data = Some(&bytes[body_start..body_end]),
            _ => {}
        }
        // Chunks are word-aligned.
        pos = body_end + (size & 1);
    }
    match (spec, data) {
        (Some(spec), Some(data)) => Ok((spec, data)),
        _ => Err(VoiceError::Codec("WAV missing fmt or data chunk".into())),
    }
}

/// Streaming Opus→PCM decoder for one inbound speech track (48 kHz stereo,
/// 960-sample frames). One decoder per capture burst; stale decoders are
/// discarded on speech-start so packet-loss state never leaks across
/// utterances.
pub struct OpusDecoder {
    inner: OpusInner,
    pcm: Vec<i16>,
}

impl OpusDecoder {
    pub fn new() -> VoiceResult<Self> {
        let inner = OpusInner::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| VoiceError::Codec(format!("opus decoder init: {e}")))?;
        Ok(Self {
            inner,
            pcm: vec![0i16; OPUS_FRAME_SAMPLES * CHANNELS as usize],
        })
    }

    /// Decode one Opus packet into interleaved 16-bit little-endian PCM bytes.
    pub fn decode_frame(&mut self, packet: &[u8]) -> VoiceResult<Vec<u8>> {
        let samples_per_channel = self
            .inner
            .decode(Some(packet), &mut self.pcm, false)
            .map_err(|e| VoiceError::Codec(format!("opus decode: {e}")))?;
        let interleaved = &self.pcm[..samples_per_channel * CHANNELS as usize];
        let mut out = Vec::with_capacity(interleaved.len() * 2);
        for sample in interleaved {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }
}

/// Encode raw 48 kHz stereo s16le PCM to an Ogg/Opus stream via ffmpeg.
/// Optional outbound path: the transport accepts raw WAV/PCM, so this is only
/// used where upstream bandwidth matters. A broken pipe on the write side
/// (ffmpeg exiting early) is logged and surfaced as a codec error, never a
/// panic.
pub async fn pcm_to_opus(pcm: &[u8]) -> VoiceResult<Vec<u8>> {
    let mut child = Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "s16le",
            "-ar",
            "48000",
            "-ac",
            "2",
            "-i",
            "pipe:0",
            "-c:a",
            "libopus",
            "-b:a",
            "64k",
            "-f",
            "ogg",
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| VoiceError::Codec(format!("ffmpeg spawn failed: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| VoiceError::Codec("ffmpeg stdin unavailable".into()))?;
    let input = pcm.to_vec();
    let writer = tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&input).await {
            // ffmpeg can exit before consuming all input; never crash the session.
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                warn!("ffmpeg closed its input early (broken pipe)");
            } else {
                warn!("writing PCM to ffmpeg failed: {}", e);
            }
        }
        // Dropping stdin closes the pipe and lets ffmpeg flush.
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| VoiceError::Codec(format!("ffmpeg wait failed: {e}")))?;
    let _ = writer.await;

    if !output.status.success() {
        return Err(VoiceError::Codec(format!(
            "ffmpeg exited with {}",
            output.status
        )));
    }
    debug!(
        pcm_bytes = pcm.len(),
        opus_bytes = output.stdout.len(),
        "encoded outbound audio"
    );
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiopus::coder::Encoder;
    use audiopus::Application;

    #[test]
    fn wav_is_header_plus_samples() {
        // 25 frames of 3200 bytes, all above the noise gate.
        let pcm = vec![0u8; 25 * 3200];
        let wav = pcm_to_wav(&pcm, WavSpec::default());
        assert_eq!(wav.len(), 44 + 25 * 3200);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn wav_round_trip_preserves_format_and_samples() {
        let pcm: Vec<u8> = (0..3840u32).map(|i| (i % 251) as u8).collect();
        let spec = WavSpec::default();
        let wav = pcm_to_wav(&pcm, spec);
        let (parsed_spec, data) = parse_wav(&wav).unwrap();
        assert_eq!(parsed_spec, spec);
        assert_eq!(data, &pcm[..]);
    }

    #[test]
    fn parse_rejects_non_wav() {
        assert!(parse_wav(b"OggS\x00\x00\x00\x00junkjunk").is_err());
        assert!(parse_wav(b"RI").is_err());
    }

    #[test]
    fn parse_rejects_truncated_data_chunk() {
        let mut wav = pcm_to_wav(&[0u8; 512], WavSpec::default());
        wav.truncate(wav.len() - 100);
        assert!(parse_wav(&wav).is_err());
    }

    #[test]
    fn opus_frame_round_trip() {
        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Voip)
            .expect("encoder init");
        // One 20ms frame of a quiet ramp.
        let samples: Vec<i16> = (0..OPUS_FRAME_SAMPLES * 2)
            .map(|i| ((i % 128) as i16 - 64) * 8)
            .collect();
        let mut packet = vec![0u8; 4000];
        let len = encoder.encode(&samples, &mut packet).expect("encode");
        packet.truncate(len);

        let mut decoder = OpusDecoder::new().unwrap();
        let pcm = decoder.decode_frame(&packet).unwrap();
        // 960 samples per channel, stereo, 2 bytes each.
        assert_eq!(pcm.len(), OPUS_FRAME_SAMPLES * 2 * 2);
    }

    #[test]
    fn garbage_packet_is_an_error_not_a_panic() {
        let mut decoder = OpusDecoder::new().unwrap();
        assert!(decoder.decode_frame(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires an ffmpeg binary on PATH.
    async fn ffmpeg_encodes_ogg_opus() {
        let pcm = vec![0u8; 48_000 * 2 * 2 / 10]; // 100ms of silence
        let ogg = pcm_to_opus(&pcm).await.unwrap();
        assert_eq!(&ogg[0..4], b"OggS");
    }
}
