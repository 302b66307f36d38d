use std::io::Read;
use std::sync::Arc;

use super::{Feedback, FeedbackSender, MediaPacket, MediaSession, MediaTrack, SessionError, TrackInfo};
use crate::cancel::CancellationToken;
use crate::container::ContainerReader;
use crate::error::PipelineError;

/// Replays a recorded container as if it were a live track.
///
/// The recording ends with `Ok(None)` rather than `TrackEnded` so the
/// pipeline drains instead of tearing down.
pub struct ReplaySession {
    input: Option<Box<dyn Read + Send>>,
    ssrc: u32,
}

impl ReplaySession {
    pub fn new(input: impl Read + Send + 'static) -> Self {
        Self {
            input: Some(Box::new(input)),
            ssrc: 1,
        }
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }
}

impl MediaSession for ReplaySession {
    fn accept_track(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn MediaTrack>, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| SessionError::Transport("replay track already taken".to_string()))?;
        let reader = ContainerReader::new(input).map_err(to_session_error)?;
        let header = *reader.header();
        let info = TrackInfo {
            ssrc: self.ssrc,
            payload_type: 96,
            mime_type: mime_for_fourcc(&header.fourcc),
        };
        log::info!(
            "replay: track started {} {}x{}",
            info.mime_type,
            header.width,
            header.height
        );
        Ok(Box::new(ReplayTrack {
            reader,
            info,
            feedback: Arc::new(ReplayFeedback),
        }))
    }
}

pub struct ReplayTrack {
    reader: ContainerReader<Box<dyn Read + Send>>,
    info: TrackInfo,
    feedback: Arc<ReplayFeedback>,
}

impl MediaTrack for ReplayTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    fn read_packet(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaPacket>, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.reader.next_packet().map_err(to_session_error)
    }

    fn feedback(&self) -> Arc<dyn FeedbackSender> {
        self.feedback.clone()
    }
}

/// A recording has no sender to ask for keyframes.
struct ReplayFeedback;

impl FeedbackSender for ReplayFeedback {
    fn send(&self, feedback: Feedback) -> Result<(), SessionError> {
        log::debug!("replay: ignoring {:?}", feedback);
        Ok(())
    }
}

fn to_session_error(err: PipelineError) -> SessionError {
    match err {
        PipelineError::Container(msg) => SessionError::Malformed(msg),
        PipelineError::Cancelled => SessionError::Cancelled,
        other => SessionError::Transport(other.to_string()),
    }
}

fn mime_for_fourcc(fourcc: &[u8; 4]) -> String {
    match fourcc {
        b"VP80" => "video/VP8".to_string(),
        b"VP90" => "video/VP9".to_string(),
        b"AV01" => "video/AV1".to_string(),
        b"H264" => "video/H264".to_string(),
        other => format!("video/{}", String::from_utf8_lossy(other)),
    }
}
