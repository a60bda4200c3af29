//! Adapters around the external image-processing capabilities
//!
//! The pipeline only depends on the [`BackgroundRemover`] and [`EdgeRefiner`]
//! traits; the bundled implementations ([`ChromaKeyRemover`],
//! [`GeminiRefiner`]) are interchangeable with any other backend, and tests
//! substitute their own.

mod background;
mod refine;

pub use background::ChromaKeyRemover;
pub use refine::{EdgeAnalysis, GeminiRefiner};

use crate::config::ApiCredential;
use crate::error::Result;
use async_trait::async_trait;
use image::RgbaImage;

/// Stateless background removal capability.
///
/// Implementations must be safe to call concurrently from multiple workers
/// without external synchronization.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Turn raw image bytes (PNG/JPEG/WEBP/BMP) into an RGBA image with the
    /// background stripped to transparency.
    async fn remove(&self, bytes: &[u8]) -> Result<RgbaImage>;
}

/// Optional AI-driven edge refinement capability.
///
/// Invoked only after the shared rate limiter granted a permit.
#[async_trait]
pub trait EdgeRefiner: Send + Sync {
    /// Produce a refined copy of `image` with cleaner edge transparency.
    async fn refine(&self, image: &RgbaImage, credential: &ApiCredential) -> Result<RgbaImage>;
}

/// Replace the alpha channel with a 3x3 box blur of itself, softening the
/// cutout edge without touching the color channels.
pub(crate) fn smooth_alpha(image: &RgbaImage) -> RgbaImage {
    filter_alpha(image, |samples| {
        let sum: u32 = samples.iter().map(|&a| u32::from(a)).sum();
        (sum / samples.len() as u32) as u8
    })
}

/// Replace the alpha channel with a 3x3 minimum filter of itself, eroding
/// the cutout edge by roughly one pixel (removes bright halo fringes).
pub(crate) fn erode_alpha(image: &RgbaImage) -> RgbaImage {
    filter_alpha(image, |samples| {
        samples.iter().copied().min().unwrap_or(0)
    })
}

fn filter_alpha<F>(image: &RgbaImage, kernel: F) -> RgbaImage
where
    F: Fn(&[u8]) -> u8,
{
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    let mut samples = Vec::with_capacity(9);

    for y in 0..height {
        for x in 0..width {
            samples.clear();
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = i64::from(x) + dx;
                    let ny = i64::from(y) + dy;
                    if nx >= 0 && ny >= 0 && nx < i64::from(width) && ny < i64::from(height) {
                        samples.push(image.get_pixel(nx as u32, ny as u32).0[3]);
                    }
                }
            }
            out.get_pixel_mut(x, y).0[3] = kernel(&samples);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn image_with_alpha(alphas: &[[u8; 3]; 3]) -> RgbaImage {
        let mut img = RgbaImage::new(3, 3);
        for (y, row) in alphas.iter().enumerate() {
            for (x, &a) in row.iter().enumerate() {
                img.put_pixel(x as u32, y as u32, Rgba([200, 100, 50, a]));
            }
        }
        img
    }

    #[test]
    fn test_smooth_alpha_averages_neighbors() {
        let img = image_with_alpha(&[[0, 0, 0], [0, 255, 0], [0, 0, 0]]);
        let smoothed = smooth_alpha(&img);
        // Center becomes the mean of the full 3x3 block
        assert_eq!(smoothed.get_pixel(1, 1).0[3], 255 / 9);
        // Colors are untouched
        assert_eq!(&smoothed.get_pixel(1, 1).0[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_erode_alpha_takes_neighborhood_minimum() {
        let img = image_with_alpha(&[[255, 255, 255], [255, 255, 0], [255, 255, 255]]);
        let eroded = erode_alpha(&img);
        // The transparent neighbor drags the center to zero
        assert_eq!(eroded.get_pixel(1, 1).0[3], 0);
        // A corner far from the hole keeps full opacity
        assert_eq!(eroded.get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn test_filters_preserve_dimensions() {
        let img = RgbaImage::new(5, 7);
        assert_eq!(smooth_alpha(&img).dimensions(), (5, 7));
        assert_eq!(erode_alpha(&img).dimensions(), (5, 7));
    }
}
