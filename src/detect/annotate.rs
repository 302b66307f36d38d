use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use super::classify::{Classification, Status};
use super::contours::{BoundingBox, MotionRegion};
use crate::frame::FrameBuffer;

const BOUNDS_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_SCALE: f32 = 16.0;
const LABEL_X: i32 = 10;
// Top of the glyph box; puts the baseline near y = 20.
const LABEL_TOP: i32 = 6;
const SWATCH_SIZE: u32 = 6;
// Built-in label: 5x7 cells drawn at 2x, occupying rows LABEL_TOP..20.
const GLYPH_SCALE: u32 = 2;
const GLYPH_ADVANCE: i32 = 6 * GLYPH_SCALE as i32;

/// A frame ready for the display sink.
pub struct AnnotatedFrame {
    pub index: u64,
    pub image: RgbImage,
    pub status: Status,
    pub regions: Vec<MotionRegion>,
}

/// Labels use the configured font, else a built-in block glyph set.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw outlines, bounds and the status label onto the frame.
    pub fn annotate(&self, frame: FrameBuffer, classification: Classification) -> AnnotatedFrame {
        let index = frame.index();
        let mut image = frame.into_image();
        let status = classification.status;
        let color = status.color();

        for region in &classification.regions {
            draw_outline(&mut image, region, color);
            draw_bounds(&mut image, &region.bounds);
        }

        draw_filled_rect_mut(
            &mut image,
            Rect::at(0, 0).of_size(SWATCH_SIZE, SWATCH_SIZE),
            color,
        );
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut image,
                color,
                LABEL_X,
                LABEL_TOP,
                PxScale::from(LABEL_SCALE),
                font,
                status.label(),
            );
        } else {
            draw_block_label(&mut image, status.label(), color);
        }

        AnnotatedFrame {
            index,
            image,
            status,
            regions: classification.regions,
        }
    }
}

/// Two-pixel-thick outline: every boundary point becomes a 2x2 dot.
fn draw_outline(image: &mut RgbImage, region: &MotionRegion, color: Rgb<u8>) {
    for point in &region.outline {
        draw_filled_rect_mut(image, Rect::at(point.x, point.y).of_size(2, 2), color);
    }
}

fn draw_bounds(image: &mut RgbImage, bounds: &BoundingBox) {
    draw_hollow_rect_mut(
        image,
        Rect::at(bounds.x, bounds.y).of_size(bounds.width, bounds.height),
        BOUNDS_COLOR,
    );
    if bounds.width > 2 && bounds.height > 2 {
        draw_hollow_rect_mut(
            image,
            Rect::at(bounds.x + 1, bounds.y + 1).of_size(bounds.width - 2, bounds.height - 2),
            BOUNDS_COLOR,
        );
    }
}

fn draw_block_label(image: &mut RgbImage, label: &str, color: Rgb<u8>) {
    for (i, ch) in label.chars().enumerate() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            continue;
        };
        let left = LABEL_X + i as i32 * GLYPH_ADVANCE;
        for (r, bits) in rows.iter().enumerate() {
            for col in 0..5 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let x = left + col * GLYPH_SCALE as i32;
                let y = LABEL_TOP + r as i32 * GLYPH_SCALE as i32;
                draw_filled_rect_mut(
                    image,
                    Rect::at(x, y).of_size(GLYPH_SCALE, GLYPH_SCALE),
                    color,
                );
            }
        }
    }
}

/// Rows of a 5x7 cell, most significant of the low five bits leftmost.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        _ => return None,
    };
    Some(rows)
}
