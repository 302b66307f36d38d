//! Media ingestion bridge.
//!
//! Takes packets from the session's active track, frames each one as an IVF
//! record and writes it to the container stream. While the track is active a
//! keep-alive task asks the sender for a keyframe every interval; its
//! failures are logged and never fail the pipeline.
//!
//! The output stream is closed on every exit path, so the transcoder sees
//! end-of-stream instead of stalling.

use crossbeam_channel::{select, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::{FrameSettings, IngestSettings};
use crate::container::{ContainerHeader, ContainerWriter};
use crate::error::PipelineError;
use crate::session::{Feedback, FeedbackSender, MediaSession};
use crate::stream::StreamWriter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub packets: u64,
    pub bytes: u64,
}

pub struct IngestionBridge {
    session: Box<dyn MediaSession>,
    header: ContainerHeader,
    keepalive: Duration,
    cancel: CancellationToken,
}

impl IngestionBridge {
    pub fn new(
        session: Box<dyn MediaSession>,
        ingest: &IngestSettings,
        frame: FrameSettings,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let (Ok(width), Ok(height)) = (u16::try_from(frame.width), u16::try_from(frame.height))
        else {
            return Err(PipelineError::Container(format!(
                "frame size {}x{} does not fit the header",
                frame.width, frame.height
            )));
        };
        Ok(Self {
            session,
            header: ContainerHeader::new(ingest.fourcc, width, height),
            keepalive: ingest.keepalive,
            cancel,
        })
    }

    /// Pump packets into `out` until the track ends, fails or is cancelled.
    pub fn run(mut self, out: StreamWriter) -> Result<IngestStats, PipelineError> {
        let mut track = self.session.accept_track(&self.cancel)?;
        let info = track.info().clone();
        log::info!(
            "track has started, of type {}: {} (ssrc {})",
            info.payload_type,
            info.mime_type,
            info.ssrc
        );

        let _keepalive = KeepAlive::spawn(
            track.feedback(),
            info.ssrc,
            self.keepalive,
            self.cancel.clone(),
        );

        let mut writer = ContainerWriter::new(out, self.header)?;
        let mut stats = IngestStats::default();
        loop {
            let Some(packet) = track.read_packet(&self.cancel)? else {
                log::info!("track finished after {} packets", stats.packets);
                break;
            };
            writer.write_packet(&packet)?;
            stats.packets += 1;
            stats.bytes += packet.payload.len() as u64;
        }
        writer.get_mut().close();
        Ok(stats)
    }
}

/// Periodic picture-loss request, stopped when dropped or on cancellation.
pub struct KeepAlive {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn spawn(
        feedback: Arc<dyn FeedbackSender>,
        ssrc: u32,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("keepalive".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let pli = Feedback::PictureLossIndication { media_ssrc: ssrc };
                            if let Err(e) = feedback.send(pli) {
                                log::warn!("[keepalive] error: {}", e);
                            }
                        }
                        recv(stop_rx) -> _ => break,
                        recv(cancel.signal()) -> _ => break,
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("[keepalive] failed to start: {}", e);
                None
            }
        };
        Self {
            stop: Some(stop_tx),
            handle,
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
