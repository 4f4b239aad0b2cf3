//! Seam to the hosting voice transport.
//!
//! The transport (a Discord-style gateway, an SFU, a test double) is consumed
//! at this boundary, never implemented here: it delivers one user's inbound
//! speech track as events and accepts synthesized bytes for playback. The
//! session manager always joins self-deafened so the bot cannot hear its own
//! output at the connection level.

use crate::error::VoiceResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type UserId = u64;
pub type ChannelId = u64;

/// Playback side of the connection. `play` queues one synthesized track; the
/// transport reports the resulting state flips via `TransportEvent::Player`.
pub trait TrackPlayer: Send + Sync {
    fn play(&self, audio: Vec<u8>) -> VoiceResult<()>;
    fn stop(&self);
}

/// Track player state transitions as the transport reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Idle,
}

/// Events delivered by an established voice connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A user began speaking on their track.
    SpeakingStart { user: UserId },
    /// One Opus frame from a user's speech track.
    OpusFrame { user: UserId, payload: Vec<u8> },
    /// The playback track changed state.
    Player(PlayerState),
    /// The connection dropped; the session must tear down.
    Disconnected,
}

/// An established, self-deafened voice channel connection.
#[async_trait]
pub trait VoiceConnection: Send {
    /// Take the event stream. Yields `None` after the first call; the session
    /// actor is the only consumer.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// The connection's playback handle.
    fn player(&self) -> Arc<dyn TrackPlayer>;

    /// Leave the channel and release transport resources. Idempotent.
    async fn disconnect(&mut self) -> VoiceResult<()>;
}

/// Entry point the session manager uses to join a channel.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        channel: ChannelId,
        self_deaf: bool,
    ) -> VoiceResult<Box<dyn VoiceConnection>>;
}
