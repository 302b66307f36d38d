//! Motion detection.
//!
//! One detection cycle per frame:
//!
//! `AwaitFrame -> MaskComputed -> Thresholded -> Dilated -> ContoursExtracted
//!  -> Classified -> Annotated -> Displayed -> AwaitFrame`
//!
//! The background model and contour extractor sit behind traits so
//! alternative backends can be swapped in without touching the pipeline.

mod annotate;
mod background;
mod classify;
mod contours;
pub mod postprocess;

pub use annotate::{AnnotatedFrame, Annotator};
pub use background::{BackgroundModel, ForegroundMask, MixtureBackground, BACKGROUND, FOREGROUND};
pub use classify::{Classification, ContourClassifier, Status};
pub use contours::{bounding_box, polygon_area, BorderFollowing, BoundingBox, ContourExtractor, MotionRegion};

use crate::config::{BackgroundSettings, DetectSettings, FrameSettings};
use crate::error::PipelineError;
use crate::frame::FrameBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    AwaitFrame,
    MaskComputed,
    Thresholded,
    Dilated,
    ContoursExtracted,
    Classified,
    Annotated,
    Displayed,
    Shutdown,
}

/// Background model + mask clean-up + classifier + annotator for one stream.
pub struct MotionDetector {
    model: Box<dyn BackgroundModel>,
    classifier: ContourClassifier,
    annotator: Annotator,
    settings: DetectSettings,
    state: CycleState,
}

impl MotionDetector {
    pub fn new(
        model: Box<dyn BackgroundModel>,
        classifier: ContourClassifier,
        annotator: Annotator,
        settings: DetectSettings,
    ) -> Self {
        log::debug!(
            "detector: {} background, {} contours, min area {}",
            model.name(),
            classifier.extractor_name(),
            classifier.min_area()
        );
        Self {
            model,
            classifier,
            annotator,
            settings,
            state: CycleState::AwaitFrame,
        }
    }

    /// Default backends: Gaussian mixture background, border-following contours.
    pub fn with_defaults(
        frame: FrameSettings,
        detect: DetectSettings,
        background: BackgroundSettings,
        annotator: Annotator,
    ) -> Self {
        Self::new(
            Box::new(MixtureBackground::new(frame.width, frame.height, background)),
            ContourClassifier::new(Box::new(BorderFollowing), detect.min_area),
            annotator,
            detect,
        )
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run one cycle up to `Annotated`. The caller displays the result and
    /// then calls `displayed`.
    pub fn process(&mut self, frame: FrameBuffer) -> Result<AnnotatedFrame, PipelineError> {
        if self.state == CycleState::Shutdown {
            return Err(PipelineError::Detection("detector is shut down".to_string()));
        }
        let raw = self.model.apply(&frame)?;
        self.state = CycleState::MaskComputed;

        let thresholded = postprocess::threshold(&raw, self.settings.threshold);
        self.state = CycleState::Thresholded;

        let dilated = postprocess::dilate_square(&thresholded, self.settings.dilate_kernel);
        self.state = CycleState::Dilated;

        let components = self.classifier.extract(&dilated);
        self.state = CycleState::ContoursExtracted;

        let classification = self.classifier.filter(components);
        self.state = CycleState::Classified;
        log::debug!(
            "frame {}: {} ({} of {} components >= {})",
            frame.index(),
            classification.status,
            classification.regions.len(),
            classification.candidates,
            self.classifier.min_area()
        );

        let annotated = self.annotator.annotate(frame, classification);
        self.state = CycleState::Annotated;
        Ok(annotated)
    }

    /// Mark the annotated frame as handed to the sink; the loop then awaits
    /// the next frame.
    pub fn displayed(&mut self) {
        if self.state == CycleState::Annotated {
            self.state = CycleState::Displayed;
        }
    }

    /// Between cycles: nothing in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, CycleState::AwaitFrame | CycleState::Displayed)
    }

    /// Release the model; further frames are rejected.
    pub fn shutdown(&mut self) {
        if self.state != CycleState::Shutdown {
            log::debug!(
                "detector shutting down after {} frames ({})",
                self.model.frames_seen(),
                self.model.name()
            );
            self.state = CycleState::Shutdown;
        }
    }
}
