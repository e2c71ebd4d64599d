//! Frame preprocessing ahead of symbol decoding.
//!
//! A frame is reduced to luminance, smoothed with a 9x9 Gaussian and then
//! binarized at the Otsu level. The blur suppresses sensor noise that would
//! otherwise break up thin bars; Otsu picks the split between the ink and
//! paper modes of the histogram so lighting changes do not need tuning.

use crate::error::{MediaError, MediaResult};
use image::GrayImage;
use imageproc::contrast::otsu_level;
use imageproc::filter::separable_filter_equal;
use scanrtc_core::PixelBuffer;

/// Side length of the square blur kernel
pub const BLUR_KERNEL_SIZE: usize = 9;

/// Normalized 1-D Gaussian taps for a kernel of `size` taps.
///
/// Sigma is derived from the size the same way common vision libraries do
/// when no sigma is given: `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: usize) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let denom = 2.0 * sigma * sigma;

    let mut taps: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= sum);
    taps
}

/// Wrap a frame's luminance plane as a grayscale image
pub fn luminance_image(frame: &PixelBuffer) -> MediaResult<GrayImage> {
    let luma = frame.luminance();
    let actual = luma.len();
    GrayImage::from_raw(frame.width(), frame.height(), luma).ok_or(MediaError::InvalidFrameData {
        expected: frame.width() as usize * frame.height() as usize,
        actual,
    })
}

/// Threshold in place at the Otsu level: above the level becomes white,
/// everything else black. Returns the level used.
pub fn binarize(image: &mut GrayImage) -> u8 {
    let level = otsu_level(image);
    for pixel in image.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
    level
}

/// Full preprocessing chain: luminance, 9x9 Gaussian blur, Otsu binarization
pub fn preprocess(frame: &PixelBuffer) -> MediaResult<GrayImage> {
    let gray = luminance_image(frame)?;
    let mut blurred = separable_filter_equal(&gray, &gaussian_kernel(BLUR_KERNEL_SIZE));
    binarize(&mut blurred);
    Ok(blurred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanrtc_core::PixelFormat;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(BLUR_KERNEL_SIZE);
        assert_eq!(kernel.len(), 9);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..4 {
            assert!((kernel[i] - kernel[8 - i]).abs() < 1e-6);
            assert!(kernel[i] < kernel[i + 1]);
        }
    }

    #[test]
    fn test_even_kernel_size_rounds_up() {
        assert_eq!(gaussian_kernel(4).len(), 5);
        assert_eq!(gaussian_kernel(0), vec![1.0]);
    }

    #[test]
    fn test_binarize_splits_two_levels() {
        let mut image = GrayImage::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 40 } else { 200 }]));
        let level = binarize(&mut image);
        assert!((40..200).contains(&level));
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(7, 7).0[0], 255);
    }

    #[test]
    fn test_preprocess_keeps_dimensions() {
        let data: Vec<u8> = (0..32 * 24 * 3).map(|i| (i % 251) as u8).collect();
        let frame = PixelBuffer::new(32, 24, PixelFormat::Rgb24, data).unwrap();
        let out = preprocess(&frame).unwrap();
        assert_eq!(out.dimensions(), (32, 24));
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }
}
