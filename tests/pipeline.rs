//! End-to-end runs over real child processes.
//!
//! Recordings here hold uncompressed rgb24 frames, and the transcoder is
//! `container_dump --payloads`, which turns them back into a raw frame
//! stream. That exercises every stage without needing ffmpeg.

use std::io::Cursor;
use std::time::{Duration, Instant};

use peer_motion::config::MotionConfig;
use peer_motion::container::{ContainerHeader, ContainerWriter};
use peer_motion::detect::Status;
use peer_motion::display::RecordingSink;
use peer_motion::session::{ChannelSession, MediaPacket, ReplaySession, SessionError, TrackInfo};
use peer_motion::transcode::TranscoderCommand;
use peer_motion::{Pipeline, PipelineError, ShutdownReason, Stage};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn config() -> MotionConfig {
    let mut cfg = MotionConfig::default();
    cfg.frame.width = WIDTH;
    cfg.frame.height = HEIGHT;
    cfg.detect.min_area = 100.0;
    cfg.ingest.fourcc = *b"RGB3";
    cfg.ingest.keepalive = Duration::from_millis(50);
    cfg
}

fn raw_passthrough() -> TranscoderCommand {
    TranscoderCommand::custom(env!("CARGO_BIN_EXE_container_dump"), ["--payloads", "-"])
}

/// Uniform gray frame, optionally with a bright square at (x, y).
fn frame(block: Option<(u32, u32, u32)>) -> Vec<u8> {
    let mut data = vec![70u8; (WIDTH * HEIGHT * 3) as usize];
    if let Some((bx, by, side)) = block {
        for y in by..by + side {
            for x in bx..bx + side {
                let at = ((y * WIDTH + x) * 3) as usize;
                data[at..at + 3].copy_from_slice(&[250, 250, 250]);
            }
        }
    }
    data
}

fn recording(frames: &[Vec<u8>]) -> Vec<u8> {
    let header = ContainerHeader::new(*b"RGB3", WIDTH as u16, HEIGHT as u16);
    let mut writer = ContainerWriter::new(Vec::new(), header).unwrap();
    for (seq, payload) in frames.iter().enumerate() {
        writer
            .write_packet(&MediaPacket::new(seq as u64, payload.clone()))
            .unwrap();
    }
    writer.into_inner()
}

fn track() -> TrackInfo {
    TrackInfo {
        ssrc: 4242,
        payload_type: 96,
        mime_type: "video/VP8".to_string(),
    }
}

#[test]
fn replay_detects_motion_and_drains() {
    let mut frames: Vec<Vec<u8>> = (0..8).map(|_| frame(None)).collect();
    frames.push(frame(Some((20, 10, 16))));
    frames.push(frame(None));
    let session = ReplaySession::new(Cursor::new(recording(&frames)));
    let sink = RecordingSink::new();

    let report = Pipeline::new(config(), Box::new(session), Box::new(sink.clone()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .run()
        .expect("pipeline run");

    assert_eq!(report.shutdown, ShutdownReason::EndOfStream);
    assert_eq!(report.frames, 10);
    assert!(report.motion_frames >= 1);

    let records = sink.records();
    assert_eq!(records.len(), 10);
    assert!(records[..8].iter().all(|r| r.status == Status::Stale));
    assert_eq!(records[8].status, Status::Detected);
    assert_eq!(records[8].regions, 1);
    let indices: Vec<u64> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<u64>>());
}

#[test]
fn small_changes_stay_stale() {
    let mut frames: Vec<Vec<u8>> = (0..6).map(|_| frame(None)).collect();
    // 5x5 block: under the 100 px minimum even after dilation.
    frames.push(frame(Some((30, 20, 5))));
    let session = ReplaySession::new(Cursor::new(recording(&frames)));
    let sink = RecordingSink::new();

    let report = Pipeline::new(config(), Box::new(session), Box::new(sink.clone()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .run()
        .expect("pipeline run");
    assert_eq!(report.frames, 7);
    assert_eq!(report.motion_frames, 0);
    assert!(sink.records().iter().all(|r| r.status == Status::Stale));
}

#[test]
fn partial_final_frame_is_a_short_read() {
    let mut frames: Vec<Vec<u8>> = (0..3).map(|_| frame(None)).collect();
    frames.push(vec![70u8; 1000]);
    let session = ReplaySession::new(Cursor::new(recording(&frames)));
    let sink = RecordingSink::new();

    let failure = Pipeline::new(config(), Box::new(session), Box::new(sink.clone()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .run()
        .expect_err("short read");
    assert_eq!(failure.stage, Stage::Detect);
    assert!(matches!(
        failure.error,
        PipelineError::ShortRead { actual: 1000, .. }
    ));
    assert_eq!(sink.records().len(), 3);
}

#[test]
fn frame_limit_unwinds_a_live_track() {
    let (session, feed) = ChannelSession::new();
    feed.start_track(track()).unwrap();
    for seq in 0..6 {
        feed.push(MediaPacket::new(seq, frame(None))).unwrap();
    }

    let started = Instant::now();
    let report = Pipeline::new(config(), Box::new(session), Box::new(RecordingSink::new()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .with_max_frames(Some(4))
        .run()
        .expect("pipeline run");
    assert_eq!(report.shutdown, ShutdownReason::FrameLimit);
    assert_eq!(report.frames, 4);
    assert!(started.elapsed() < Duration::from_secs(20));
    drop(feed);
}

#[test]
fn operator_stop_unwinds_a_live_track() {
    let (session, feed) = ChannelSession::new();
    let keepalives = session.feedback_log();
    feed.start_track(track()).unwrap();
    for seq in 0..5 {
        feed.push(MediaPacket::new(seq, frame(None))).unwrap();
    }
    let sink = RecordingSink::new().stop_after(3);

    let report = Pipeline::new(config(), Box::new(session), Box::new(sink.clone()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .run()
        .expect("pipeline run");
    assert_eq!(report.shutdown, ShutdownReason::OperatorStop);
    assert_eq!(report.frames, 3);
    assert_eq!(sink.records().len(), 3);
    // Keep-alive stopped with the track; nothing after shutdown.
    let sent = keepalives.sent().len();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(keepalives.sent().len(), sent);
    drop(feed);
}

#[test]
fn track_ended_is_fatal_to_ingest() {
    let (session, feed) = ChannelSession::new();
    feed.start_track(track()).unwrap();
    for seq in 0..3 {
        feed.push(MediaPacket::new(seq, frame(None))).unwrap();
    }
    drop(feed);

    let failure = Pipeline::new(config(), Box::new(session), Box::new(RecordingSink::new()))
        .expect("valid config")
        .with_transcoder(raw_passthrough())
        .run()
        .expect_err("track ended");
    assert_eq!(failure.stage, Stage::Ingest);
    assert!(matches!(
        failure.error,
        PipelineError::Session(SessionError::TrackEnded)
    ));
}

#[test]
fn external_cancel_stops_every_stage() {
    let (session, feed) = ChannelSession::new();
    feed.start_track(track()).unwrap();
    feed.push(MediaPacket::new(0, frame(None))).unwrap();
    let sink = RecordingSink::new();

    let pipeline = Pipeline::new(config(), Box::new(session), Box::new(sink.clone()))
        .expect("valid config")
        .with_transcoder(raw_passthrough());
    let cancel = pipeline.cancel_token();
    let watcher = {
        let sink = sink.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while sink.records().is_empty() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            cancel.cancel();
        })
    };

    let report = pipeline.run().expect("cancel is not an error");
    assert_eq!(report.shutdown, ShutdownReason::Cancelled);
    assert_eq!(report.frames, 1);
    watcher.join().unwrap();
    drop(feed);
}

#[cfg(unix)]
#[test]
fn transcoder_failure_is_reported_with_its_stage() {
    let frames: Vec<Vec<u8>> = (0..2).map(|_| frame(None)).collect();
    let session = ReplaySession::new(Cursor::new(recording(&frames)));

    let failure = Pipeline::new(config(), Box::new(session), Box::new(RecordingSink::new()))
        .expect("valid config")
        .with_transcoder(TranscoderCommand::custom(
            "sh",
            ["-c", "cat > /dev/null; exit 3"],
        ))
        .run()
        .expect_err("transcoder exit");
    assert_eq!(failure.stage, Stage::Transcode);
    assert!(matches!(failure.error, PipelineError::Transcoder(_)));
    assert!(failure.to_string().starts_with("[transcode]"));
}

#[cfg(unix)]
#[test]
fn transcoder_failure_after_partial_output_is_not_a_short_read() {
    let frames: Vec<Vec<u8>> = vec![frame(None)];
    for _ in 0..5 {
        let session = ReplaySession::new(Cursor::new(recording(&frames)));
        let failure = Pipeline::new(config(), Box::new(session), Box::new(RecordingSink::new()))
            .expect("valid config")
            .with_transcoder(TranscoderCommand::custom(
                "sh",
                ["-c", "cat > /dev/null; head -c 1000 /dev/zero; exit 3"],
            ))
            .run()
            .expect_err("transcoder exit");
        assert_eq!(failure.stage, Stage::Transcode, "{}", failure);
        assert!(matches!(failure.error, PipelineError::Transcoder(_)));
    }
}

#[test]
fn invalid_config_is_rejected_before_any_stage_starts() {
    let mut cfg = config();
    cfg.background.max_modes = 0;
    let session = ReplaySession::new(Cursor::new(recording(&[frame(None)])));
    assert!(Pipeline::new(cfg, Box::new(session), Box::new(RecordingSink::new())).is_err());

    let mut cfg = config();
    cfg.frame.width = 70_000;
    let session = ReplaySession::new(Cursor::new(recording(&[frame(None)])));
    assert!(Pipeline::new(cfg, Box::new(session), Box::new(RecordingSink::new())).is_err());
}

#[test]
fn missing_transcoder_fails_fast() {
    let (session, feed) = ChannelSession::new();
    feed.start_track(track()).unwrap();

    let failure = Pipeline::new(config(), Box::new(session), Box::new(RecordingSink::new()))
        .expect("valid config")
        .with_transcoder(TranscoderCommand::custom(
            "/nonexistent/transcoder",
            Vec::<String>::new(),
        ))
        .run()
        .expect_err("spawn failure");
    assert_eq!(failure.stage, Stage::Transcode);
    drop(feed);
}
