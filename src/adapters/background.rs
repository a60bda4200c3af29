//! Default background removal backend
//!
//! A self-contained chroma-key remover for studio product shots: the
//! background color is estimated from the image border, matching pixels are
//! cleared to transparency, and the resulting alpha edge is softened with a
//! box blur. Heavier neural backends plug in behind the same
//! [`BackgroundRemover`] trait.

use super::{smooth_alpha, BackgroundRemover};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tracing::debug;

/// Default squared-distance tolerance for background matching
const DEFAULT_TOLERANCE: u32 = 40;

/// Border-sampling chroma-key background remover
pub struct ChromaKeyRemover {
    tolerance: u32,
}

impl ChromaKeyRemover {
    /// Create a remover with the default tolerance
    #[must_use]
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Create a remover with a custom color-distance tolerance (0-255 scale)
    #[must_use]
    pub fn with_tolerance(tolerance: u32) -> Self {
        Self { tolerance }
    }

    /// Mean color of the one-pixel border, used as the background estimate
    fn estimate_background(image: &RgbaImage) -> Rgba<u8> {
        let (width, height) = image.dimensions();
        let mut sum = [0u64; 3];
        let mut count = 0u64;

        let mut sample = |x: u32, y: u32, sum: &mut [u64; 3], count: &mut u64| {
            let px = image.get_pixel(x, y).0;
            sum[0] += u64::from(px[0]);
            sum[1] += u64::from(px[1]);
            sum[2] += u64::from(px[2]);
            *count += 1;
        };

        for x in 0..width {
            sample(x, 0, &mut sum, &mut count);
            if height > 1 {
                sample(x, height - 1, &mut sum, &mut count);
            }
        }
        for y in 1..height.saturating_sub(1) {
            sample(0, y, &mut sum, &mut count);
            if width > 1 {
                sample(width - 1, y, &mut sum, &mut count);
            }
        }

        let count = count.max(1);
        Rgba([
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
            255,
        ])
    }

    fn color_distance_sq(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
        let dr = i32::from(a.0[0]) - i32::from(b.0[0]);
        let dg = i32::from(a.0[1]) - i32::from(b.0[1]);
        let db = i32::from(a.0[2]) - i32::from(b.0[2]);
        (dr * dr + dg * dg + db * db) as u32
    }
}

impl Default for ChromaKeyRemover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundRemover for ChromaKeyRemover {
    async fn remove(&self, bytes: &[u8]) -> Result<RgbaImage> {
        let decoded = image::load_from_memory(bytes).map_err(|e| {
            PipelineError::background_removal(format!(
                "failed to decode source image ({} bytes): {e}. Supported formats: PNG, JPEG, WebP, BMP",
                bytes.len()
            ))
        })?;

        let mut rgba = decoded.to_rgba8();
        let background = Self::estimate_background(&rgba);
        let threshold = self.tolerance * self.tolerance;

        let mut cleared = 0u64;
        for pixel in rgba.pixels_mut() {
            if Self::color_distance_sq(*pixel, background) <= threshold {
                pixel.0[3] = 0;
                cleared += 1;
            }
        }
        debug!(
            width = rgba.width(),
            height = rgba.height(),
            cleared,
            "background removal finished"
        );

        Ok(smooth_alpha(&rgba))
    }
}
