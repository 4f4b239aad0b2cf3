//! **Audio Capture & Segmenter** — bounds an inbound PCM stream into discrete
//! utterances.
//!
//! Segmentation is a per-frame reset timer, not an ML voice-activity
//! detector: every accepted frame re-arms the silence deadline, and the
//! utterance finalizes when the deadline passes or the buffer cap is hit.
//! The struct is a pure state machine; the session actor owns the actual
//! timer (`sleep_until(deadline)`) and the decode stream, so everything here
//! is unit-testable without clocks.

use chrono::{DateTime, Utc};
use murmur_core::CaptureSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Capture state for one session. `Processing` doubles as the software echo
/// guard: all inbound frames are dropped until it clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Processing,
}

/// What finalized the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// The silence deadline passed with no accepted frame.
    Silence,
    /// The buffer reached its hard frame cap mid-capture.
    BufferFull,
}

/// Result of offering one frame to the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Dropped: not capturing, or below the noise gate.
    Ignored,
    /// Buffered; the silence deadline was re-armed.
    Accepted,
    /// Buffered and the frame cap was reached; finalize immediately.
    Finalize(FinalizeReason),
}

/// A finalized utterance: concatenated PCM, ephemeral. Wrapped to WAV at the
/// ASR boundary and dropped right after hand-off.
#[derive(Debug)]
pub struct Utterance {
    pub pcm: Vec<u8>,
    pub frames: usize,
    pub captured_at: DateTime<Utc>,
}

pub struct UtteranceSegmenter {
    settings: CaptureSettings,
    state: CaptureState,
    frames: Vec<Vec<u8>>,
    deadline: Option<Instant>,
}

impl UtteranceSegmenter {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            state: CaptureState::Idle,
            frames: Vec::new(),
            deadline: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The instant at which the current capture should finalize for silence,
    /// if a capture is in progress.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Speech-start for the session's user. Returns `false` while Processing:
    /// the event is dropped outright and no buffer is allocated. Returns
    /// `true` when capture is (or stays) armed — the caller must then discard
    /// any stale decode stream and open a fresh one.
    pub fn begin_capture(&mut self, now: Instant) -> bool {
        match self.state {
            CaptureState::Processing => false,
            CaptureState::Capturing => true,
            CaptureState::Idle => {
                self.state = CaptureState::Capturing;
                self.frames.clear();
                self.deadline = Some(now + Duration::from_millis(self.settings.silence_ms));
                true
            }
        }
    }

    /// Offer one decoded PCM frame. Frames below the noise gate are ignored;
    /// accepted frames re-arm the silence deadline; hitting the frame cap
    /// demands immediate finalize, independent of the timer.
    pub fn push_frame(&mut self, frame: Vec<u8>, now: Instant) -> FrameOutcome {
        if self.state != CaptureState::Capturing {
            return FrameOutcome::Ignored;
        }
        if frame.len() < self.settings.min_frame_bytes {
            return FrameOutcome::Ignored;
        }
        self.frames.push(frame);
        if self.frames.len() >= self.settings.max_buffer_frames {
            self.deadline = None;
            return FrameOutcome::Finalize(FinalizeReason::BufferFull);
        }
        self.deadline = Some(now + Duration::from_millis(self.settings.silence_ms));
        FrameOutcome::Accepted
    }

    /// Close the current capture. Buffers with fewer than `min_packet_count`
    /// accepted frames are ambient noise: discarded silently, state returns
    /// to Idle, and the orchestrator is never invoked. Otherwise the frames
    /// are concatenated into one utterance and state moves to Processing
    /// (capture suppressed until `complete_processing`).
    pub fn finalize(&mut self, reason: FinalizeReason) -> Option<Utterance> {
        if self.state != CaptureState::Capturing {
            return None;
        }
        self.deadline = None;
        let frames = std::mem::take(&mut self.frames);
        if frames.len() < self.settings.min_packet_count {
            debug!(
                frames = frames.len(),
                min = self.settings.min_packet_count,
                "utterance below packet minimum; discarding as noise"
            );
            self.state = CaptureState::Idle;
            return None;
        }
        let total: usize = frames.iter().map(Vec::len).sum();
        let mut pcm = Vec::with_capacity(total);
        for frame in &frames {
            pcm.extend_from_slice(frame);
        }
        self.state = CaptureState::Processing;
        debug!(frames = frames.len(), bytes = pcm.len(), ?reason, "utterance finalized");
        Some(Utterance {
            pcm,
            frames: frames.len(),
            captured_at: Utc::now(),
        })
    }

    /// Pipeline and playback are both done: re-arm capture.
    pub fn complete_processing(&mut self) {
        if self.state == CaptureState::Processing {
            self.state = CaptureState::Idle;
        }
    }

    /// Drop any partial capture (session teardown).
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.frames.clear();
        self.deadline = None;
    }
}
