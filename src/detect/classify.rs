use image::Rgb;
use std::fmt;

use super::background::ForegroundMask;
use super::contours::{ContourExtractor, MotionRegion};

/// Per-frame motion verdict. Never carried between frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Stale,
    Detected,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Stale => "Stale",
            Status::Detected => "Motion Detected",
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            Status::Stale => Rgb([0, 255, 0]),
            Status::Detected => Rgb([255, 0, 0]),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    pub status: Status,
    /// Regions that survived the area filter, in discovery order.
    pub regions: Vec<MotionRegion>,
    /// Components found before the area filter.
    pub candidates: usize,
}

/// Turns a cleaned mask into a verdict.
pub struct ContourClassifier {
    extractor: Box<dyn ContourExtractor>,
    min_area: f64,
}

impl ContourClassifier {
    pub fn new(extractor: Box<dyn ContourExtractor>, min_area: f64) -> Self {
        Self { extractor, min_area }
    }

    pub fn min_area(&self) -> f64 {
        self.min_area
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Pure function of the mask: same mask, same result.
    pub fn classify(&self, mask: &ForegroundMask) -> Classification {
        self.filter(self.extract(mask))
    }

    pub fn extract(&self, mask: &ForegroundMask) -> Vec<MotionRegion> {
        self.extractor.extract(mask)
    }

    /// Apply the minimum-area filter to extracted components.
    pub fn filter(&self, components: Vec<MotionRegion>) -> Classification {
        let candidates = components.len();
        let regions: Vec<MotionRegion> = components
            .into_iter()
            .filter(|region| region.area >= self.min_area)
            .collect();
        let status = if regions.is_empty() {
            Status::Stale
        } else {
            Status::Detected
        };
        Classification {
            status,
            regions,
            candidates,
        }
    }
}
