//! Pipeline orchestration.
//!
//! Three stages run on their own threads, joined by two byte streams:
//!
//! ```text
//! session -> [ingest] -> container -> [transcode] -> frames -> [detect] -> sink
//! ```
//!
//! Every stage reports exactly once. The first fatal report cancels the
//! shared token; the remaining stages unwind and report `Cancelled`, which
//! is not an error. A stage that stops early raises the token itself before
//! releasing its streams. `run` returns only after every stage has finished.

use crossbeam_channel::Sender;
use std::thread::JoinHandle;

use crate::cancel::CancellationToken;
use crate::config::MotionConfig;
use crate::detect::{Annotator, MotionDetector, Status};
use crate::display::{DisplaySink, SinkControl};
use crate::error::{PipelineError, Stage, StageFailure};
use crate::frame::FrameAssembler;
use crate::ingest::{IngestStats, IngestionBridge};
use crate::session::MediaSession;
use crate::stream::{byte_stream, StreamReader};
use crate::transcode::{TranscodeBridge, TranscodeStats, TranscoderCommand};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The source ended and every frame was processed.
    EndOfStream,
    /// The sink asked to stop.
    OperatorStop,
    /// `max_frames` were processed.
    FrameLimit,
    /// Cancelled from outside, e.g. Ctrl-C.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames: u64,
    pub motion_frames: u64,
    pub shutdown: ShutdownReason,
}

#[derive(Clone, Copy, Debug)]
struct DetectSummary {
    frames: u64,
    motion_frames: u64,
    reason: ShutdownReason,
}

enum StageDone {
    Ingest(IngestStats),
    Transcode(TranscodeStats),
    Detect(DetectSummary),
}

type StageWork = Box<dyn FnOnce() -> Result<StageDone, PipelineError> + Send>;

struct StageReport {
    stage: Stage,
    result: Result<StageDone, PipelineError>,
}

pub struct Pipeline {
    config: MotionConfig,
    session: Box<dyn MediaSession>,
    sink: Box<dyn DisplaySink>,
    transcoder: TranscoderCommand,
    detector: Option<MotionDetector>,
    annotator: Annotator,
    max_frames: Option<u64>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: MotionConfig,
        session: Box<dyn MediaSession>,
        sink: Box<dyn DisplaySink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let transcoder = TranscoderCommand::from_settings(&config.transcoder, config.frame);
        Ok(Self {
            config,
            session,
            sink,
            transcoder,
            detector: None,
            annotator: Annotator::new(),
            max_frames: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_transcoder(mut self, transcoder: TranscoderCommand) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Replace the default detector built from the config.
    pub fn with_detector(mut self, detector: MotionDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Clone of the token every stage observes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run(self) -> Result<PipelineReport, StageFailure> {
        let Pipeline {
            config,
            session,
            sink,
            transcoder,
            detector,
            annotator,
            max_frames,
            cancel,
        } = self;

        let detector = detector.unwrap_or_else(|| {
            MotionDetector::with_defaults(config.frame, config.detect, config.background, annotator)
        });

        let (container_tx, container_rx) = byte_stream("container", &cancel);
        let (frames_tx, frames_rx) = byte_stream("frames", &cancel);
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<StageReport>();

        let ingest = IngestionBridge::new(session, &config.ingest, config.frame, cancel.clone())
            .map_err(|error| StageFailure {
                stage: Stage::Ingest,
                error,
            })?;
        let transcode = TranscodeBridge::new(transcoder, cancel.clone());
        let assembler = FrameAssembler::new(frames_rx, config.frame);
        let detect_cancel = cancel.clone();

        let stages: [(Stage, StageWork); 3] = [
            (
                Stage::Ingest,
                Box::new(move || ingest.run(container_tx).map(StageDone::Ingest)),
            ),
            (
                Stage::Transcode,
                Box::new(move || {
                    transcode
                        .run(container_rx, frames_tx)
                        .map(StageDone::Transcode)
                }),
            ),
            (
                Stage::Detect,
                Box::new(move || {
                    detect_loop(assembler, detector, sink, max_frames, &detect_cancel)
                        .map(StageDone::Detect)
                }),
            ),
        ];
        let mut handles = Vec::with_capacity(stages.len());
        for (stage, work) in stages {
            match spawn_stage(stage, &report_tx, work) {
                Ok(handle) => handles.push(handle),
                Err(failure) => {
                    cancel.cancel();
                    join_all(handles);
                    return Err(failure);
                }
            }
        }
        drop(report_tx);

        let mut failure: Option<StageFailure> = None;
        let mut summary: Option<DetectSummary> = None;
        for report in report_rx.iter() {
            match report.result {
                Ok(StageDone::Ingest(stats)) => log::info!(
                    "[{}] finished: {} packets, {} bytes",
                    report.stage,
                    stats.packets,
                    stats.bytes
                ),
                Ok(StageDone::Transcode(stats)) => log::debug!(
                    "[{}] finished: {} bytes out",
                    report.stage,
                    stats.bytes_out
                ),
                Ok(StageDone::Detect(done)) => {
                    log::info!(
                        "[{}] finished after {} frames ({:?})",
                        report.stage,
                        done.frames,
                        done.reason
                    );
                    summary = Some(done);
                }
                Err(error) if error.is_fatal() => {
                    log::error!("[{}] error: {}", report.stage, error);
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(StageFailure::new(report.stage, error));
                    }
                }
                Err(_) => log::debug!("[{}] cancelled", report.stage),
            }
        }

        if let Some(stage) = join_all(handles) {
            if failure.is_none() {
                failure = Some(StageFailure::new(
                    stage,
                    PipelineError::Detection(format!("{} stage panicked", stage)),
                ));
            }
        }

        if let Some(failure) = failure {
            return Err(failure);
        }
        let summary = summary.unwrap_or(DetectSummary {
            frames: 0,
            motion_frames: 0,
            reason: ShutdownReason::Cancelled,
        });
        Ok(PipelineReport {
            frames: summary.frames,
            motion_frames: summary.motion_frames,
            shutdown: summary.reason,
        })
    }
}

fn spawn_stage(
    stage: Stage,
    reports: &Sender<StageReport>,
    work: StageWork,
) -> Result<(Stage, JoinHandle<()>), StageFailure> {
    let reports = reports.clone();
    std::thread::Builder::new()
        .name(stage.name().to_string())
        .spawn(move || {
            let result = work();
            let _ = reports.send(StageReport { stage, result });
        })
        .map(|handle| (stage, handle))
        .map_err(|e| StageFailure::new(stage, PipelineError::Io(e)))
}

/// Join every stage; returns the first one that panicked.
fn join_all(handles: Vec<(Stage, JoinHandle<()>)>) -> Option<Stage> {
    let mut panicked = None;
    for (stage, handle) in handles {
        if handle.join().is_err() {
            log::error!("[{}] error: stage panicked", stage);
            panicked.get_or_insert(stage);
        }
    }
    panicked
}

fn detect_loop(
    mut assembler: FrameAssembler<StreamReader>,
    mut detector: MotionDetector,
    mut sink: Box<dyn DisplaySink>,
    max_frames: Option<u64>,
    cancel: &CancellationToken,
) -> Result<DetectSummary, PipelineError> {
    let result = run_cycles(&mut assembler, &mut detector, sink.as_mut(), max_frames, cancel);
    detector.shutdown();
    let stopped_early = match &result {
        Ok(summary) => matches!(
            summary.reason,
            ShutdownReason::OperatorStop | ShutdownReason::FrameLimit
        ),
        Err(e) => e.is_fatal(),
    };
    if stopped_early {
        // Raised before the frame reader drops, so the transcoder unwinds
        // as cancelled instead of reporting a broken pipe.
        cancel.cancel();
    }
    result
}

fn run_cycles(
    assembler: &mut FrameAssembler<StreamReader>,
    detector: &mut MotionDetector,
    sink: &mut dyn DisplaySink,
    max_frames: Option<u64>,
    cancel: &CancellationToken,
) -> Result<DetectSummary, PipelineError> {
    let mut summary = DetectSummary {
        frames: 0,
        motion_frames: 0,
        reason: ShutdownReason::EndOfStream,
    };
    loop {
        if cancel.is_cancelled() {
            summary.reason = ShutdownReason::Cancelled;
            return Ok(summary);
        }
        if max_frames.is_some_and(|limit| summary.frames >= limit) {
            summary.reason = ShutdownReason::FrameLimit;
            return Ok(summary);
        }
        let frame = match assembler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(summary),
            Err(PipelineError::Cancelled) => {
                summary.reason = ShutdownReason::Cancelled;
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        let annotated = detector.process(frame)?;
        summary.frames += 1;
        if annotated.status == Status::Detected {
            summary.motion_frames += 1;
        }
        let control = sink
            .show(&annotated)
            .map_err(|e| PipelineError::Detection(format!("display sink: {:#}", e)))?;
        detector.displayed();
        if control == SinkControl::Stop {
            log::info!("operator requested stop at frame {}", annotated.index);
            summary.reason = ShutdownReason::OperatorStop;
            return Ok(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundSettings, DetectSettings, FrameSettings};
    use crate::display::RecordingSink;
    use std::io::Write;

    const FRAME: FrameSettings = FrameSettings {
        width: 32,
        height: 24,
    };

    fn detector() -> MotionDetector {
        MotionDetector::with_defaults(
            FRAME,
            DetectSettings {
                min_area: 50.0,
                ..DetectSettings::default()
            },
            BackgroundSettings::default(),
            Annotator::new(),
        )
    }

    fn gray_frame() -> Vec<u8> {
        vec![90; FRAME.frame_len()]
    }

    fn run(
        bytes: &[u8],
        max_frames: Option<u64>,
        sink: RecordingSink,
        cancel: &CancellationToken,
    ) -> Result<DetectSummary, PipelineError> {
        let (mut tx, rx) = byte_stream("frames", cancel);
        tx.write_all(bytes).unwrap();
        tx.close();
        detect_loop(
            FrameAssembler::new(rx, FRAME),
            detector(),
            Box::new(sink),
            max_frames,
            cancel,
        )
    }

    #[test]
    fn processes_every_frame_until_end_of_stream() {
        let cancel = CancellationToken::new();
        let sink = RecordingSink::new();
        let bytes: Vec<u8> = (0..4).flat_map(|_| gray_frame()).collect();
        let summary = run(&bytes, None, sink.clone(), &cancel).unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.motion_frames, 0);
        assert_eq!(summary.reason, ShutdownReason::EndOfStream);
        let indices: Vec<u64> = sink.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn frame_limit_stops_and_cancels_upstream() {
        let cancel = CancellationToken::new();
        let bytes: Vec<u8> = (0..6).flat_map(|_| gray_frame()).collect();
        let summary = run(&bytes, Some(2), RecordingSink::new(), &cancel).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.reason, ShutdownReason::FrameLimit);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn short_read_is_fatal_to_the_loop() {
        let cancel = CancellationToken::new();
        let sink = RecordingSink::new();
        let mut bytes = gray_frame();
        bytes.extend_from_slice(&gray_frame()[..100]);
        let result = run(&bytes, None, sink.clone(), &cancel);
        assert!(matches!(
            result,
            Err(PipelineError::ShortRead { actual: 100, .. })
        ));
        assert_eq!(sink.records().len(), 1);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn operator_stop_ends_the_loop() {
        let cancel = CancellationToken::new();
        let bytes: Vec<u8> = (0..5).flat_map(|_| gray_frame()).collect();
        let summary = run(&bytes, None, RecordingSink::new().stop_after(3), &cancel).unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.reason, ShutdownReason::OperatorStop);
    }

    #[test]
    fn external_cancel_is_not_an_error() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = byte_stream("frames", &cancel);
        let stopper = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                cancel.cancel();
            })
        };
        let summary = detect_loop(
            FrameAssembler::new(rx, FRAME),
            detector(),
            Box::new(RecordingSink::new()),
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(summary.reason, ShutdownReason::Cancelled);
        assert_eq!(summary.frames, 0);
        stopper.join().unwrap();
    }
}
