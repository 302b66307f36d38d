//! Peer Motion
//!
//! Motion detection on a live video track received from a remote peer.
//!
//! # Architecture
//!
//! Packets from the active track are framed into an IVF container and piped
//! through an external transcoder (ffmpeg by default) that emits packed
//! 3-channel frames of a fixed size. Each frame then runs one detection
//! cycle: adaptive background subtraction, threshold, dilation, contour
//! extraction, area filtering and annotation. The annotated frame goes to a
//! display sink.
//!
//! Stages run concurrently and share one cancellation token. The first
//! fatal error cancels the rest; nothing is retried.
//!
//! # Module Structure
//!
//! - `session`: media session boundary (track, packets, feedback)
//! - `container`: IVF framing of compressed packets
//! - `ingest`: session to container stream, plus the keep-alive task
//! - `transcode`: container stream through the transcoder process
//! - `frame`: fixed-size frame assembly from the raw byte stream
//! - `detect`: background model, mask clean-up, contours, annotation
//! - `display`: display sinks
//! - `pipeline`: stage orchestration and error fan-in

pub mod cancel;
pub mod config;
pub mod container;
pub mod detect;
pub mod display;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod stream;
pub mod transcode;

pub use cancel::CancellationToken;
pub use config::MotionConfig;
pub use error::{PipelineError, Stage, StageFailure};
pub use frame::{FrameAssembler, FrameBuffer};
pub use pipeline::{Pipeline, PipelineReport, ShutdownReason};
