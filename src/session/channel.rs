use crossbeam_channel::{select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{Feedback, FeedbackSender, MediaPacket, MediaSession, MediaTrack, SessionError, TrackInfo};
use crate::cancel::CancellationToken;

/// Session fed by an in-process producer.
///
/// The producer side (`PacketFeed`) announces the track, pushes packets and
/// may fail the track. Dropping the feed ends the track with `TrackEnded`,
/// the same as a live peer going away.
pub struct ChannelSession {
    started: Receiver<TrackInfo>,
    packets: Option<Receiver<Result<MediaPacket, SessionError>>>,
    feedback: Arc<RecordingFeedback>,
}

pub struct PacketFeed {
    started: Sender<TrackInfo>,
    packets: Sender<Result<MediaPacket, SessionError>>,
}

impl ChannelSession {
    pub fn new() -> (Self, PacketFeed) {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (packets_tx, packets_rx) = crossbeam_channel::unbounded();
        (
            Self {
                started: started_rx,
                packets: Some(packets_rx),
                feedback: Arc::new(RecordingFeedback::default()),
            },
            PacketFeed {
                started: started_tx,
                packets: packets_tx,
            },
        )
    }

    /// Feedback messages the track has sent so far.
    pub fn feedback_log(&self) -> Arc<RecordingFeedback> {
        self.feedback.clone()
    }
}

impl PacketFeed {
    pub fn start_track(&self, info: TrackInfo) -> Result<(), SessionError> {
        self.started
            .send(info)
            .map_err(|_| SessionError::Transport("session dropped".to_string()))
    }

    pub fn push(&self, packet: MediaPacket) -> Result<(), SessionError> {
        self.packets
            .send(Ok(packet))
            .map_err(|_| SessionError::Transport("session dropped".to_string()))
    }

    pub fn fail(&self, error: SessionError) -> Result<(), SessionError> {
        self.packets
            .send(Err(error))
            .map_err(|_| SessionError::Transport("session dropped".to_string()))
    }
}

impl MediaSession for ChannelSession {
    fn accept_track(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn MediaTrack>, SessionError> {
        let info = select! {
            recv(self.started) -> info => info.map_err(|_| SessionError::TrackEnded)?,
            recv(cancel.signal()) -> _ => return Err(SessionError::Cancelled),
        };
        let packets = self
            .packets
            .take()
            .ok_or_else(|| SessionError::Transport("track already accepted".to_string()))?;
        Ok(Box::new(ChannelTrack {
            info,
            packets,
            feedback: self.feedback.clone(),
        }))
    }
}

pub struct ChannelTrack {
    info: TrackInfo,
    packets: Receiver<Result<MediaPacket, SessionError>>,
    feedback: Arc<RecordingFeedback>,
}

impl MediaTrack for ChannelTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    fn read_packet(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaPacket>, SessionError> {
        select! {
            recv(self.packets) -> packet => match packet {
                Ok(Ok(packet)) => Ok(Some(packet)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(SessionError::TrackEnded),
            },
            recv(cancel.signal()) -> _ => Err(SessionError::Cancelled),
        }
    }

    fn feedback(&self) -> Arc<dyn FeedbackSender> {
        self.feedback.clone()
    }
}

/// Keeps every feedback message; optionally rejects them to exercise error paths.
#[derive(Default)]
pub struct RecordingFeedback {
    sent: Mutex<Vec<Feedback>>,
    reject: AtomicBool,
}

impl RecordingFeedback {
    pub fn sent(&self) -> Vec<Feedback> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

impl FeedbackSender for RecordingFeedback {
    fn send(&self, feedback: Feedback) -> Result<(), SessionError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SessionError::Feedback("peer rejected feedback".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| SessionError::Feedback("feedback log poisoned".to_string()))?
            .push(feedback);
        Ok(())
    }
}
