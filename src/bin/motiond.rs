//! motiond - motion detection daemon
//!
//! This daemon:
//! 1. Accepts the video track (a recorded IVF container when replaying)
//! 2. Pipes it through the configured transcoder
//! 3. Runs one detection cycle per frame
//! 4. Logs status changes and optionally writes snapshots of motion frames
//!
//! Configuration comes from `MOTION_CONFIG` (JSON) plus `MOTION_*`
//! environment overrides; flags below override both.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use peer_motion::detect::Annotator;
use peer_motion::display::{FanOutSink, LogSink, SnapshotSink};
use peer_motion::session::ReplaySession;
use peer_motion::{MotionConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect motion in a video track")]
struct Args {
    /// IVF recording to replay as the incoming track ("-" for stdin).
    #[arg(long, default_value = "-")]
    replay: String,

    /// Directory for PNG snapshots of frames with motion.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Write at most one snapshot every N frames.
    #[arg(long, default_value_t = 15)]
    snapshot_every: u64,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// TrueType/OpenType font for the status label.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MotionConfig::load()?;
    if let Some(dir) = args.snapshot_dir {
        config.display.snapshot_dir = Some(dir);
    }
    if let Some(font) = args.font {
        config.display.font_path = Some(font);
    }
    config.validate()?;
    log::info!(
        "motiond starting: {}x{}, min area {}, transcoder {}",
        config.frame.width,
        config.frame.height,
        config.detect.min_area,
        config.transcoder.program
    );

    let session = if args.replay == "-" {
        ReplaySession::new(std::io::stdin())
    } else {
        let file = File::open(&args.replay)
            .with_context(|| format!("failed to open recording {}", args.replay))?;
        ReplaySession::new(BufReader::new(file))
    };

    let mut sink = FanOutSink::new();
    sink.push(Box::new(LogSink::default()));
    if let Some(dir) = &config.display.snapshot_dir {
        sink.push(Box::new(SnapshotSink::new(dir, args.snapshot_every)?));
        log::info!("writing motion snapshots to {}", dir.display());
    }

    let annotator = match &config.display.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => Annotator::new(),
    };

    let pipeline = Pipeline::new(config, Box::new(session), Box::new(sink))?
        .with_annotator(annotator)
        .with_max_frames(args.max_frames);

    let cancel = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        if cancel.cancel() {
            log::info!("interrupt received, shutting down");
        }
    })
    .context("error setting Ctrl-C handler")?;

    let report = pipeline.run()?;
    log::info!(
        "motiond stopped ({:?}): {} frames, {} with motion",
        report.shutdown,
        report.frames,
        report.motion_frames
    );
    Ok(())
}
