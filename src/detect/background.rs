//! Adaptive per-pixel background model.
//!
//! Each pixel carries up to `max_modes` weighted Gaussians over its RGB
//! value, ordered by weight. A sample that lands close to one of the heavy
//! (background) modes is background; anything else is foreground. Every
//! frame updates the model with learning rate `1 / min(2n, history)`, so the
//! model converges fast at start-up and then adapts slowly to lighting drift.
//!
//! The update runs in frame order with plain `f32` arithmetic and a stable
//! mode ordering, so the same frames always produce the same masks.

use image::{GrayImage, Luma};

use crate::config::BackgroundSettings;
use crate::error::PipelineError;
use crate::frame::FrameBuffer;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

const CHANNELS: usize = 3;
const MAX_MODES: usize = 8;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 5.0 * VAR_INIT;
/// Squared-distance factor (in variances) under which a sample updates a mode.
const VAR_THRESHOLD_GEN: f32 = 9.0;
/// Complexity reduction prior: weak modes decay away.
const COMPLEXITY_REDUCTION: f32 = 0.05;

/// Single-channel mask, same size as the frame it was computed from.
pub struct ForegroundMask {
    image: GrayImage,
}

impl ForegroundMask {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([BACKGROUND])),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }

    pub fn foreground_pixels(&self) -> usize {
        self.image.as_raw().iter().filter(|&&v| v != BACKGROUND).count()
    }
}

/// Background subtraction backend.
pub trait BackgroundModel: Send {
    fn name(&self) -> &'static str;

    /// Classify `frame` against the learned background, then learn from it.
    fn apply(&mut self, frame: &FrameBuffer) -> Result<ForegroundMask, PipelineError>;

    fn frames_seen(&self) -> u64;
}

/// Gaussian mixture background subtractor.
pub struct MixtureBackground {
    width: u32,
    height: u32,
    settings: BackgroundSettings,
    modes_used: Vec<u8>,
    weights: Vec<f32>,
    means: Vec<f32>,
    variances: Vec<f32>,
    frames_seen: u64,
}

// Deliberately not Clone: the model is owned by the detection loop alone.

impl MixtureBackground {
    /// Out-of-range `max_modes` and `history` are clamped to 1..=8 and at
    /// least 1.
    pub fn new(width: u32, height: u32, mut settings: BackgroundSettings) -> Self {
        settings.max_modes = settings.max_modes.clamp(1, MAX_MODES);
        settings.history = settings.history.max(1);
        let pixels = width as usize * height as usize;
        let k = settings.max_modes;
        Self {
            width,
            height,
            settings,
            modes_used: vec![0; pixels],
            weights: vec![0.0; pixels * k],
            means: vec![0.0; pixels * k * CHANNELS],
            variances: vec![0.0; pixels * k],
            frames_seen: 0,
        }
    }

    fn learning_rate(&self) -> f32 {
        let n = self.frames_seen.saturating_mul(2).max(1);
        1.0 / n.min(self.settings.history as u64) as f32
    }

    /// Seed every pixel with a single mode at its first observed value.
    fn seed(&mut self, data: &[u8]) {
        let k = self.settings.max_modes;
        for (p, px) in data.chunks_exact(CHANNELS).enumerate() {
            self.modes_used[p] = 1;
            self.weights[p * k] = 1.0;
            self.variances[p * k] = VAR_INIT;
            let mean = &mut self.means[p * k * CHANNELS..p * k * CHANNELS + CHANNELS];
            for c in 0..CHANNELS {
                mean[c] = px[c] as f32;
            }
        }
    }

    /// Update one pixel's mixture; returns true when the sample is background.
    fn update_pixel(&mut self, p: usize, px: [f32; CHANNELS], alpha: f32) -> bool {
        let k = self.settings.max_modes;
        let base = p * k;
        let weights = &mut self.weights[base..base + k];
        let variances = &mut self.variances[base..base + k];
        let means = &mut self.means[base * CHANNELS..(base + k) * CHANNELS];
        let mut used = self.modes_used[p] as usize;

        let ratio = self.settings.background_ratio;
        let tb = self.settings.var_threshold;
        let alpha1 = 1.0 - alpha;
        let prune = -alpha * COMPLEXITY_REDUCTION;

        let mut fits = false;
        let mut background = false;
        let mut total_weight = 0.0f32;

        let mut m = 0;
        while m < used {
            let mut weight = alpha1 * weights[m] + prune;
            if !fits {
                let var = variances[m];
                let mean = &mut means[m * CHANNELS..m * CHANNELS + CHANNELS];
                let mut diff = [0.0f32; CHANNELS];
                let mut dist2 = 0.0;
                for c in 0..CHANNELS {
                    diff[c] = px[c] - mean[c];
                    dist2 += diff[c] * diff[c];
                }
                if total_weight < ratio && dist2 < tb * var {
                    background = true;
                }
                if dist2 < VAR_THRESHOLD_GEN * var {
                    fits = true;
                    weight += alpha;
                    let rate = alpha / weight;
                    for c in 0..CHANNELS {
                        mean[c] += rate * diff[c];
                    }
                    variances[m] = (var + rate * (dist2 - var)).clamp(VAR_MIN, VAR_MAX);
                }
            }
            if weight < -prune {
                // Spent mode: drop it, keeping the order of the rest.
                remove_mode(weights, variances, means, m, used);
                used -= 1;
                continue;
            }
            weights[m] = weight;
            total_weight += weight;
            m += 1;
        }

        if total_weight > 0.0 {
            let norm = 1.0 / total_weight;
            for w in weights.iter_mut().take(used) {
                *w *= norm;
            }
        }

        if !fits {
            let slot = if used == k { k - 1 } else { used };
            if slot == used {
                used += 1;
            }
            if used == 1 {
                weights[slot] = 1.0;
            } else {
                weights[slot] = alpha;
                for w in weights.iter_mut().take(used - 1) {
                    *w *= alpha1;
                }
            }
            variances[slot] = VAR_INIT;
            means[slot * CHANNELS..slot * CHANNELS + CHANNELS].copy_from_slice(&px);
        }

        sort_modes(weights, variances, means, used);
        self.modes_used[p] = used as u8;
        background
    }
}

impl BackgroundModel for MixtureBackground {
    fn name(&self) -> &'static str {
        "gaussian-mixture"
    }

    fn apply(&mut self, frame: &FrameBuffer) -> Result<ForegroundMask, PipelineError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PipelineError::Detection(format!(
                "frame {}x{} does not match background model {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let data = frame.as_bytes();
        if self.frames_seen == 0 {
            self.seed(data);
            self.frames_seen = 1;
            return Ok(ForegroundMask::empty(self.width, self.height));
        }

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let mut mask = vec![BACKGROUND; self.width as usize * self.height as usize];
        for (p, px) in data.chunks_exact(CHANNELS).enumerate() {
            let sample = [px[0] as f32, px[1] as f32, px[2] as f32];
            if !self.update_pixel(p, sample, alpha) {
                mask[p] = FOREGROUND;
            }
        }
        let image = GrayImage::from_raw(self.width, self.height, mask)
            .ok_or_else(|| PipelineError::Detection("mask buffer size mismatch".to_string()))?;
        Ok(ForegroundMask::new(image))
    }

    fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

fn remove_mode(weights: &mut [f32], variances: &mut [f32], means: &mut [f32], m: usize, used: usize) {
    for i in m..used - 1 {
        weights[i] = weights[i + 1];
        variances[i] = variances[i + 1];
        means.copy_within((i + 1) * CHANNELS..(i + 2) * CHANNELS, i * CHANNELS);
    }
}

/// Stable insertion sort by descending weight.
fn sort_modes(weights: &mut [f32], variances: &mut [f32], means: &mut [f32], used: usize) {
    for i in 1..used {
        let mut j = i;
        while j > 0 && weights[j] > weights[j - 1] {
            weights.swap(j, j - 1);
            variances.swap(j, j - 1);
            for c in 0..CHANNELS {
                means.swap(j * CHANNELS + c, (j - 1) * CHANNELS + c);
            }
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, value: u8, index: u64) -> FrameBuffer {
        let data = vec![value; width as usize * height as usize * 3];
        FrameBuffer::from_raw(width, height, data, index).unwrap()
    }

    fn with_block(width: u32, height: u32, bg: u8, fg: u8, block: (u32, u32, u32, u32)) -> FrameBuffer {
        let (bx, by, bw, bh) = block;
        let mut data = vec![bg; width as usize * height as usize * 3];
        for y in by..by + bh {
            for x in bx..bx + bw {
                let at = (y as usize * width as usize + x as usize) * 3;
                data[at..at + 3].copy_from_slice(&[fg, fg, fg]);
            }
        }
        FrameBuffer::from_raw(width, height, data, 0).unwrap()
    }

    #[test]
    fn first_frame_seeds_with_empty_mask() -> anyhow::Result<()> {
        let mut model = MixtureBackground::new(8, 6, BackgroundSettings::default());
        let mask = model.apply(&uniform(8, 6, 90, 0))?;
        assert_eq!(mask.foreground_pixels(), 0);
        assert_eq!(model.frames_seen(), 1);
        Ok(())
    }

    #[test]
    fn degenerate_settings_are_clamped() -> anyhow::Result<()> {
        let settings = BackgroundSettings {
            max_modes: 0,
            history: 0,
            ..BackgroundSettings::default()
        };
        let mut model = MixtureBackground::new(8, 6, settings);
        for i in 0..5 {
            let mask = model.apply(&uniform(8, 6, 90, i))?;
            assert_eq!(mask.foreground_pixels(), 0);
        }
        let mask = model.apply(&with_block(8, 6, 90, 220, (2, 2, 2, 2)))?;
        assert_eq!(mask.foreground_pixels(), 4);
        Ok(())
    }

    #[test]
    fn sensor_noise_is_absorbed() -> anyhow::Result<()> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut model = MixtureBackground::new(16, 12, BackgroundSettings::default());
        for i in 0..40 {
            let data: Vec<u8> = (0..16 * 12 * 3)
                .map(|_| (100i16 + rng.gen_range(-2i16..=2)) as u8)
                .collect();
            let frame = FrameBuffer::from_raw(16, 12, data, i)?;
            let mask = model.apply(&frame)?;
            assert_eq!(mask.foreground_pixels(), 0, "frame {}", i);
        }
        Ok(())
    }

    #[test]
    fn static_scene_stays_background() -> anyhow::Result<()> {
        let mut model = MixtureBackground::new(8, 6, BackgroundSettings::default());
        for i in 0..20 {
            let mask = model.apply(&uniform(8, 6, 90, i))?;
            assert_eq!(mask.foreground_pixels(), 0, "frame {}", i);
        }
        Ok(())
    }

    #[test]
    fn sharp_change_is_foreground_only_where_it_happens() -> anyhow::Result<()> {
        let mut model = MixtureBackground::new(16, 12, BackgroundSettings::default());
        for i in 0..10 {
            model.apply(&uniform(16, 12, 40, i))?;
        }
        let mask = model.apply(&with_block(16, 12, 40, 220, (4, 3, 5, 4)))?;
        assert_eq!(mask.foreground_pixels(), 20);
        assert_eq!(mask.image().get_pixel(4, 3).0[0], FOREGROUND);
        assert_eq!(mask.image().get_pixel(0, 0).0[0], BACKGROUND);
        Ok(())
    }

    #[test]
    fn persistent_change_is_absorbed_into_background() -> anyhow::Result<()> {
        let settings = BackgroundSettings {
            history: 20,
            ..BackgroundSettings::default()
        };
        let mut model = MixtureBackground::new(8, 8, settings);
        for i in 0..5 {
            model.apply(&uniform(8, 8, 40, i))?;
        }
        let mut last = usize::MAX;
        for _ in 0..200 {
            last = model.apply(&uniform(8, 8, 200, 0))?.foreground_pixels();
        }
        assert_eq!(last, 0);
        Ok(())
    }

    #[test]
    fn masks_are_reproducible() -> anyhow::Result<()> {
        let frames: Vec<(u8, (u32, u32, u32, u32))> = vec![
            (10, (0, 0, 1, 1)),
            (30, (2, 2, 3, 3)),
            (200, (1, 4, 6, 2)),
            (90, (0, 0, 8, 8)),
            (91, (3, 3, 2, 2)),
        ];
        let run = || -> anyhow::Result<Vec<Vec<u8>>> {
            let mut model = MixtureBackground::new(8, 8, BackgroundSettings::default());
            let mut masks = Vec::new();
            for (value, block) in &frames {
                let mask = model.apply(&with_block(8, 8, 60, *value, *block))?;
                masks.push(mask.into_image().into_raw());
            }
            Ok(masks)
        };
        assert_eq!(run()?, run()?);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_frame_size() {
        let mut model = MixtureBackground::new(8, 8, BackgroundSettings::default());
        assert!(matches!(
            model.apply(&uniform(4, 4, 0, 0)),
            Err(PipelineError::Detection(_))
        ));
    }
}
