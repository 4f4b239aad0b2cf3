//! Playback hand-off: queue synthesized audio on the connection's track
//! player and drop it on interruption. Failures are logged, never fatal; a
//! reply that cannot be played still produced a transcript and text.

use crate::transport::TrackPlayer;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PlaybackController {
    player: Arc<dyn TrackPlayer>,
}

impl PlaybackController {
    pub fn new(player: Arc<dyn TrackPlayer>) -> Self {
        Self { player }
    }

    /// Queue one synthesized track. Returns whether the hand-off succeeded.
    pub fn play(&self, audio: Vec<u8>) -> bool {
        let len = audio.len();
        match self.player.play(audio) {
            Ok(()) => {
                debug!(bytes = len, "queued synthesized audio for playback");
                true
            }
            Err(e) => {
                warn!(error = %e, "playback hand-off failed, reply stays text-only");
                false
            }
        }
    }

    /// Stop whatever is playing. Safe to call when idle.
    pub fn stop(&self) {
        self.player.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VoiceError, VoiceResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingPlayer {
        played: AtomicUsize,
        stopped: AtomicBool,
        fail: bool,
    }

    impl TrackPlayer for RecordingPlayer {
        fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
            if self.fail {
                return Err(VoiceError::Playback("track queue closed".into()));
            }
            self.played.fetch_add(audio.len(), Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn play_hands_audio_to_the_player() {
        let player = Arc::new(RecordingPlayer::default());
        let controller = PlaybackController::new(player.clone());
        assert!(controller.play(vec![0u8; 128]));
        assert_eq!(player.played.load(Ordering::SeqCst), 128);
    }

    #[test]
    fn play_failure_is_absorbed() {
        let player = Arc::new(RecordingPlayer {
            fail: true,
            ..RecordingPlayer::default()
        });
        let controller = PlaybackController::new(player);
        assert!(!controller.play(vec![0u8; 16]));
    }

    #[test]
    fn stop_reaches_the_player() {
        let player = Arc::new(RecordingPlayer::default());
        let controller = PlaybackController::new(player.clone());
        controller.stop();
        assert!(player.stopped.load(Ordering::SeqCst));
    }
}
