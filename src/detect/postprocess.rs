//! Mask clean-up between background subtraction and contour extraction.
//!
//! Order is fixed: threshold first, then dilate. Dilating before the
//! threshold would grow low-confidence noise into regions.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

use super::background::{ForegroundMask, BACKGROUND, FOREGROUND};
use crate::config::DetectSettings;

/// Binary threshold: responses strictly above `cutoff` become foreground.
pub fn threshold(mask: &ForegroundMask, cutoff: u8) -> ForegroundMask {
    let mut out = mask.image().clone();
    for value in out.iter_mut() {
        *value = if *value > cutoff { FOREGROUND } else { BACKGROUND };
    }
    ForegroundMask::new(out)
}

/// Dilate with a square `kernel x kernel` structuring element.
pub fn dilate_square(mask: &ForegroundMask, kernel: u32) -> ForegroundMask {
    let radius = (kernel / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return ForegroundMask::new(mask.image().clone());
    }
    ForegroundMask::new(dilate(mask.image(), Norm::LInf, radius))
}

/// Threshold then dilate, as configured.
pub fn clean(mask: &ForegroundMask, settings: &DetectSettings) -> ForegroundMask {
    let thresholded = threshold(mask, settings.threshold);
    dilate_square(&thresholded, settings.dilate_kernel)
}

/// Convenience for tests and alternative backends producing graded responses.
pub fn mask_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> ForegroundMask {
    ForegroundMask::new(GrayImage::from_fn(width, height, |x, y| image::Luma([f(x, y)])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strictly_above_cutoff() {
        let mask = mask_from_fn(4, 1, |x, _| [0, 25, 26, 200][x as usize]);
        let out = threshold(&mask, 25);
        assert_eq!(out.image().as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn dilate_grows_by_kernel_radius() {
        let mask = mask_from_fn(7, 7, |x, y| if x == 3 && y == 3 { 255 } else { 0 });
        assert_eq!(dilate_square(&mask, 3).foreground_pixels(), 9);
        assert_eq!(dilate_square(&mask, 5).foreground_pixels(), 25);
        assert_eq!(dilate_square(&mask, 1).foreground_pixels(), 1);
    }

    #[test]
    fn weak_noise_is_dropped_before_dilation() {
        // A faint speckle field: dilating first would merge it into one blob.
        let mask = mask_from_fn(9, 9, |x, y| if (x + y) % 2 == 0 { 20 } else { 0 });
        let settings = DetectSettings {
            min_area: 0.0,
            threshold: 25,
            dilate_kernel: 3,
        };
        assert_eq!(clean(&mask, &settings).foreground_pixels(), 0);
    }

    #[test]
    fn dilation_closes_small_gaps() {
        let mask = mask_from_fn(9, 3, |x, _| if x == 3 || x == 5 { 255 } else { 0 });
        let out = dilate_square(&threshold(&mask, 25), 3);
        assert_eq!(out.image().get_pixel(4, 1).0[0], FOREGROUND);
    }
}
