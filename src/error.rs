//! Pipeline error kinds and stage attribution.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::session::SessionError;

/// Independently scheduled units of work in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Transcode,
    Detect,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Transcode => "transcode",
            Stage::Detect => "detect",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session: {0}")]
    Session(SessionError),

    #[error("transcoder: {0}")]
    Transcoder(String),

    #[error("short read: expected {expected} bytes, stream closed after {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("detection: {0}")]
    Detection(String),

    #[error("container: {0}")]
    Container(String),

    #[error("i/o: {0}")]
    Io(io::Error),

    /// The stage observed the cancellation broadcast and unwound.
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Cancellation is the normal way out for every stage but the first to fail.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Cancelled)
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        if crate::stream::is_cancelled_error(&err) {
            PipelineError::Cancelled
        } else {
            PipelineError::Io(err)
        }
    }
}

impl From<SessionError> for PipelineError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Session(other),
        }
    }
}

/// A fatal error together with the stage that raised it.
#[derive(Debug, Error)]
#[error("[{stage}] {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: PipelineError) -> Self {
        Self { stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_io_errors_map_to_cancelled() {
        let err: PipelineError = crate::stream::cancelled_error().into();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!err.is_fatal());

        let err: PipelineError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn stage_failure_names_the_stage() {
        let failure = StageFailure::new(
            Stage::Transcode,
            PipelineError::Transcoder("exit status 1".to_string()),
        );
        assert_eq!(failure.to_string(), "[transcode] transcoder: exit status 1");
    }
}
