//! Display sinks.
//!
//! The on-screen window lives outside this crate. A sink receives one
//! annotated frame per cycle and may answer `SinkControl::Stop` (an operator
//! key-press), which the pipeline treats as a cancellation request.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::detect::{AnnotatedFrame, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Stop,
}

pub trait DisplaySink: Send {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<SinkControl>;
}

/// Discards frames.
#[derive(Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _frame: &AnnotatedFrame) -> Result<SinkControl> {
        Ok(SinkControl::Continue)
    }
}

/// Logs status transitions.
#[derive(Default)]
pub struct LogSink {
    last: Option<Status>,
}

impl DisplaySink for LogSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<SinkControl> {
        if self.last != Some(frame.status) {
            match frame.status {
                Status::Detected => log::info!(
                    "frame {}: {} ({} regions)",
                    frame.index,
                    frame.status,
                    frame.regions.len()
                ),
                Status::Stale => log::info!("frame {}: {}", frame.index, frame.status),
            }
            self.last = Some(frame.status);
        }
        Ok(SinkControl::Continue)
    }
}

/// Writes annotated frames with motion to `dir` as PNG, at most one every
/// `every` frames.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    last_written: Option<u64>,
    written: u64,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            last_written: None,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for SnapshotSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<SinkControl> {
        if frame.status != Status::Detected {
            return Ok(SinkControl::Continue);
        }
        let due = self
            .last_written
            .map_or(true, |last| frame.index >= last + self.every);
        if due {
            let path = self.dir.join(format!("motion_{:08}.png", frame.index));
            frame
                .image
                .save(&path)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            log::debug!("snapshot written to {}", path.display());
            self.last_written = Some(frame.index);
            self.written += 1;
        }
        Ok(SinkControl::Continue)
    }
}

/// Shows every frame on each inner sink, in order. Stops when any inner
/// sink asks to.
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Box<dyn DisplaySink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn DisplaySink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DisplaySink for FanOutSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<SinkControl> {
        let mut control = SinkControl::Continue;
        for sink in &mut self.sinks {
            if sink.show(frame)? == SinkControl::Stop {
                control = SinkControl::Stop;
            }
        }
        Ok(control)
    }
}

/// One line per displayed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub index: u64,
    pub status: Status,
    pub regions: usize,
}

/// Records what was displayed; optionally asks to stop after `stop_after` frames.
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<FrameRecord>>>,
    stop_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_after(mut self, frames: usize) -> Self {
        self.stop_after = Some(frames);
        self
    }

    pub fn records(&self) -> Vec<FrameRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DisplaySink for RecordingSink {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<SinkControl> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink lock poisoned"))?;
        records.push(FrameRecord {
            index: frame.index,
            status: frame.status,
            regions: frame.regions.len(),
        });
        match self.stop_after {
            Some(limit) if records.len() >= limit => Ok(SinkControl::Stop),
            _ => Ok(SinkControl::Continue),
        }
    }
}
