//! **Voice Session Manager** — the per-user session actor and its registry.
//!
//! One session binds one user to one voice channel. Each session runs as a
//! dedicated task owning its connection, decoder, and segmenter; the manager
//! only holds shutdown handles, so no audio state is ever shared across
//! tasks. A finalized utterance is processed off-actor (`tokio::spawn`) so
//! the event loop keeps draining transport events while ASR/LLM/TTS run;
//! capture stays suppressed until both the pipeline result is consumed and
//! playback has drained, which is the software half of the echo guard (the
//! other half is joining self-deafened).

use crate::codec::OpusDecoder;
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::{PipelineResult, VoicePipeline};
use crate::playback::PlaybackController;
use crate::segment::{FinalizeReason, FrameOutcome, UtteranceSegmenter};
use crate::transport::{
    ChannelId, PlayerState, TransportEvent, UserId, VoiceConnection, VoiceTransport,
};
use murmur_core::VoiceSettings;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct SessionHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

type SessionMap = Mutex<HashMap<UserId, SessionHandle>>;

/// Registry of live sessions, bounded by `max_sessions`. Join and leave are
/// serialized on the registry lock; everything audio-related happens inside
/// the per-session task.
pub struct VoiceSessionManager {
    settings: VoiceSettings,
    pipeline: Arc<VoicePipeline>,
    sessions: Arc<SessionMap>,
}

impl VoiceSessionManager {
    pub fn new(settings: VoiceSettings, pipeline: VoicePipeline) -> Self {
        Self {
            settings,
            pipeline: Arc::new(pipeline),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Join `channel` and start listening to `user`. Returns `Ok(false)`
    /// without joining when the user already has a session or the session
    /// limit is reached; transport failures are the only hard errors.
    pub async fn join_and_listen(
        &self,
        transport: &dyn VoiceTransport,
        channel: ChannelId,
        user: UserId,
    ) -> VoiceResult<bool> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&user) {
            debug!(user, "join refused: user already has a live session");
            return Ok(false);
        }
        if sessions.len() >= self.settings.max_sessions {
            warn!(
                user,
                active = sessions.len(),
                limit = self.settings.max_sessions,
                "join refused: session limit reached"
            );
            return Ok(false);
        }

        // Always self-deafened: the hardware half of the echo guard.
        let mut connection = transport.join(channel, true).await?;
        let events = connection
            .take_events()
            .ok_or_else(|| VoiceError::Transport("connection event stream already taken".into()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let actor = SessionActor {
            user,
            segmenter: UtteranceSegmenter::new(self.settings.capture.clone()),
            pipeline: Arc::clone(&self.pipeline),
            sessions: Arc::downgrade(&self.sessions),
        };
        let task = tokio::spawn(actor.run(connection, events, shutdown_rx));
        sessions.insert(
            user,
            SessionHandle {
                shutdown: shutdown_tx,
                task,
            },
        );
        info!(user, channel, "voice session started");
        Ok(true)
    }

    /// Tear down the user's session. Idempotent: returns `false` when no
    /// session exists.
    pub async fn leave(&self, user: UserId) -> bool {
        let handle = self.sessions.lock().await.remove(&user);
        match handle {
            Some(handle) => {
                // A dead actor has already torn itself down; ignore the send.
                let _ = handle.shutdown.send(());
                info!(user, "voice session stopped");
                true
            }
            None => false,
        }
    }
}

struct SessionActor {
    user: UserId,
    segmenter: UtteranceSegmenter,
    pipeline: Arc<VoicePipeline>,
    sessions: Weak<SessionMap>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut connection: Box<dyn VoiceConnection>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let playback = PlaybackController::new(connection.player());
        let mut decoder: Option<OpusDecoder> = None;
        let mut inflight: Option<JoinHandle<PipelineResult>> = None;
        let mut awaiting_playback = false;

        loop {
            let deadline = self.segmenter.deadline();
            let pipeline_running = inflight.is_some();

            tokio::select! {
                _ = &mut shutdown => {
                    debug!(user = self.user, "session shutdown requested");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        debug!(user = self.user, "transport event stream closed");
                        break;
                    };
                    match event {
                        TransportEvent::SpeakingStart { user } if user == self.user => {
                            if self.segmenter.begin_capture(Instant::now()) {
                                // Fresh decoder per burst so loss-concealment
                                // state never leaks across utterances.
                                match OpusDecoder::new() {
                                    Ok(d) => decoder = Some(d),
                                    Err(e) => {
                                        warn!(user = self.user, error = %e, "decoder init failed; frames will be dropped");
                                        decoder = None;
                                    }
                                }
                            }
                        }
                        TransportEvent::SpeakingStart { .. } => {}
                        TransportEvent::OpusFrame { user, payload } if user == self.user => {
                            if let Some(finalize) = self.handle_frame(&mut decoder, &payload) {
                                self.spawn_pipeline(finalize, &mut inflight);
                            }
                        }
                        TransportEvent::OpusFrame { .. } => {}
                        TransportEvent::Player(PlayerState::Playing) => {
                            awaiting_playback = true;
                        }
                        TransportEvent::Player(PlayerState::Idle) => {
                            awaiting_playback = false;
                            if inflight.is_none() {
                                self.segmenter.complete_processing();
                            }
                        }
                        TransportEvent::Disconnected => {
                            info!(user = self.user, "transport disconnected; tearing down session");
                            break;
                        }
                    }
                }

                _ = sleep_until_opt(deadline), if deadline.is_some() && !pipeline_running => {
                    self.spawn_pipeline(FinalizeReason::Silence, &mut inflight);
                }

                result = join_inflight(&mut inflight), if pipeline_running => {
                    inflight = None;
                    let queued = match result {
                        Ok(result) => self.deliver(result, &playback),
                        Err(e) => {
                            warn!(user = self.user, error = %e, "pipeline task panicked");
                            false
                        }
                    };
                    if queued {
                        awaiting_playback = true;
                    } else if !awaiting_playback {
                        self.segmenter.complete_processing();
                    }
                }
            }
        }

        // An in-flight turn is left to finish on its own; dropping the handle
        // detaches it and the result is never consumed, so nothing can play
        // into a dead connection.
        if inflight.take().is_some() {
            debug!(user = self.user, "abandoning in-flight turn during teardown");
        }
        playback.stop();
        self.segmenter.reset();
        if let Err(e) = connection.disconnect().await {
            warn!(user = self.user, error = %e, "disconnect failed during teardown");
        }
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.lock().await.remove(&self.user);
        }
        debug!(user = self.user, "session actor exited");
    }

    /// Decode and offer one inbound frame. Returns a finalize reason when the
    /// segmenter demands an immediate cut (buffer cap).
    fn handle_frame(
        &mut self,
        decoder: &mut Option<OpusDecoder>,
        payload: &[u8],
    ) -> Option<FinalizeReason> {
        let Some(dec) = decoder.as_mut() else {
            return None;
        };
        let pcm = match dec.decode_frame(payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                debug!(user = self.user, error = %e, "dropping undecodable frame");
                return None;
            }
        };
        match self.segmenter.push_frame(pcm, Instant::now()) {
            FrameOutcome::Finalize(reason) => Some(reason),
            FrameOutcome::Accepted | FrameOutcome::Ignored => None,
        }
    }

    /// Finalize the current capture and, if it survived the noise minimum,
    /// run it through the pipeline off-actor.
    fn spawn_pipeline(
        &mut self,
        reason: FinalizeReason,
        inflight: &mut Option<JoinHandle<PipelineResult>>,
    ) {
        let Some(utterance) = self.segmenter.finalize(reason) else {
            return;
        };
        info!(
            user = self.user,
            frames = utterance.frames,
            bytes = utterance.pcm.len(),
            "processing utterance"
        );
        let pipeline = Arc::clone(&self.pipeline);
        *inflight = Some(tokio::spawn(async move {
            pipeline.process(&utterance.pcm).await
        }));
    }

    /// Hand a finished pipeline result to playback. Returns whether audio was
    /// queued (capture then stays suppressed until the player drains).
    fn deliver(&self, result: PipelineResult, playback: &PlaybackController) -> bool {
        if !result.success {
            warn!(
                user = self.user,
                error = result.error.as_deref().unwrap_or("unknown"),
                transcript = result.transcript.as_deref().unwrap_or(""),
                "turn failed; nothing to play"
            );
            return false;
        }
        info!(
            user = self.user,
            transcript = result.transcript.as_deref().unwrap_or(""),
            reply = result.response_text.as_deref().unwrap_or(""),
            has_audio = result.audio.is_some(),
            "turn completed"
        );
        match result.audio {
            Some(audio) => playback.play(audio),
            None => false,
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    // Guarded by `deadline.is_some()` at the select arm; the fallback only
    // keeps the expression total.
    let at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
    tokio::time::sleep_until(at).await;
}

async fn join_inflight(
    inflight: &mut Option<JoinHandle<PipelineResult>>,
) -> Result<PipelineResult, tokio::task::JoinError> {
    match inflight.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
