//! Media session boundary.
//!
//! Negotiating the peer connection happens outside this crate. What the
//! pipeline consumes is the result: exactly one active track delivering
//! packets in playout order, plus a feedback path back to the sender.
//!
//! - `MediaSession::accept_track` blocks until the track is active. Its
//!   return is the track-started notification.
//! - `MediaTrack::read_packet` yields packets until the track ends.
//! - `FeedbackSender` carries keep-alive / picture-loss requests.

use std::sync::Arc;
use thiserror::Error;

use crate::cancel::CancellationToken;

mod channel;
mod replay;

pub use channel::{ChannelSession, ChannelTrack, PacketFeed, RecordingFeedback};
pub use replay::{ReplaySession, ReplayTrack};

/// One ordered unit of compressed media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPacket {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

impl MediaPacket {
    pub fn new(sequence: u64, payload: Vec<u8>) -> Self {
        Self { sequence, payload }
    }
}

/// Description of the active track, delivered when it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub ssrc: u32,
    pub payload_type: u8,
    pub mime_type: String,
}

/// Receiver-to-sender control messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feedback {
    /// Ask the sender for a fresh keyframe.
    PictureLossIndication { media_ssrc: u32 },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("track ended")]
    TrackEnded,
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("feedback rejected: {0}")]
    Feedback(String),
    #[error("session cancelled")]
    Cancelled,
}

pub trait FeedbackSender: Send + Sync {
    fn send(&self, feedback: Feedback) -> Result<(), SessionError>;
}

pub trait MediaTrack: Send {
    fn info(&self) -> &TrackInfo;

    /// Next packet in playout order.
    ///
    /// `Ok(None)` marks the orderly end of a finite source. A live track that
    /// stops returns `Err(SessionError::TrackEnded)`. Implementations must
    /// return `Err(SessionError::Cancelled)` promptly once `cancel` is raised.
    fn read_packet(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaPacket>, SessionError>;

    fn feedback(&self) -> Arc<dyn FeedbackSender>;
}

pub trait MediaSession: Send {
    /// Block until the remote track becomes active.
    fn accept_track(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn MediaTrack>, SessionError>;
}
