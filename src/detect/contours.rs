use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

use super::background::ForegroundMask;

/// Axis-aligned bounds in pixel coordinates; `width`/`height` are inclusive counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn right(&self) -> i32 {
        self.x + self.width as i32 - 1
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32 - 1
    }

    /// True when `other` lies entirely inside these bounds.
    pub fn covers(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// One external connected foreground component.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionRegion {
    pub outline: Vec<Point<i32>>,
    pub bounds: BoundingBox,
    /// Polygon area enclosed by the outline.
    pub area: f64,
}

impl MotionRegion {
    pub fn from_outline(outline: Vec<Point<i32>>) -> Option<Self> {
        let bounds = bounding_box(&outline)?;
        let area = polygon_area(&outline);
        Some(Self {
            outline,
            bounds,
            area,
        })
    }
}

/// Contour extraction backend.
pub trait ContourExtractor: Send {
    fn name(&self) -> &'static str;

    /// Outer boundaries of top-level components, in discovery order.
    fn extract(&self, mask: &ForegroundMask) -> Vec<MotionRegion>;
}

/// Border following (Suzuki-Abe) over nonzero mask pixels, keeping only
/// outermost borders. Discovery order is raster order of each border's
/// first pixel.
#[derive(Clone, Copy, Debug, Default)]
pub struct BorderFollowing;

impl ContourExtractor for BorderFollowing {
    fn name(&self) -> &'static str {
        "border-following"
    }

    fn extract(&self, mask: &ForegroundMask) -> Vec<MotionRegion> {
        find_contours::<i32>(mask.image())
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter_map(|contour| MotionRegion::from_outline(contour.points))
            .collect()
    }
}

/// Shoelace formula over the closed outline.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice.abs() as f64) / 2.0
}

pub fn bounding_box(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox {
        x: min_x,
        y: min_y,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}
