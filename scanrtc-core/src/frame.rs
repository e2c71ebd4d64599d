//! Raw video frames and pixel buffers

use crate::error::{Result, ScanRtcError};
use bytes::Bytes;
use std::fmt;

/// Memory layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte of luminance per pixel
    Gray8,
    /// Packed 8-bit red, green, blue
    Rgb24,
    /// Packed 8-bit blue, green, red
    Bgr24,
    /// Packed 8-bit red, green, blue, alpha
    Rgba32,
    /// Planar YUV 4:2:0 (full Y plane, quarter U and V planes)
    I420,
}

impl PixelFormat {
    /// Number of bytes a `width` x `height` image occupies in this format
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Gray8 => pixels,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels * 3,
            PixelFormat::Rgba32 => pixels * 4,
            PixelFormat::I420 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
                pixels + 2 * chroma
            }
        }
    }
}

/// An uncompressed image with validated geometry
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
}

impl PixelBuffer {
    /// Wrap raw bytes, checking the length against the declared geometry
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = format.buffer_len(width, height);
        if data.len() != expected {
            return Err(ScanRtcError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Single-channel buffer from luminance bytes
    pub fn gray(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        Self::new(width, height, PixelFormat::Gray8, data)
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Single-channel luminance, one byte per pixel, row-major.
    ///
    /// Packed colour formats use the BT.601 weights
    /// (0.299 R + 0.587 G + 0.114 B), rounded to nearest. I420 frames
    /// already carry luma in their first plane, which is copied out as-is.
    pub fn luminance(&self) -> Vec<u8> {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Gray8 | PixelFormat::I420 => self.data[..pixels].to_vec(),
            PixelFormat::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|px| bt601(px[0], px[1], px[2]))
                .collect(),
            PixelFormat::Bgr24 => self
                .data
                .chunks_exact(3)
                .map(|px| bt601(px[2], px[1], px[0]))
                .collect(),
            PixelFormat::Rgba32 => self
                .data
                .chunks_exact(4)
                .map(|px| bt601(px[0], px[1], px[2]))
                .collect(),
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// Fixed-point BT.601, same coefficients as the usual BGR->GRAY conversion.
fn bt601(r: u8, g: u8, b: u8) -> u8 {
    let y = 4899 * r as u32 + 9617 * g as u32 + 1868 * b as u32;
    ((y + (1 << 13)) >> 14) as u8
}

/// One decoded video frame as received from a peer
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Arrival index within its track, starting at 0
    pub sequence: u64,
    /// Media timestamp in the track's clock units
    pub timestamp: u32,
    /// Decoded pixels
    pub buffer: PixelBuffer,
    /// Compressed access unit the pixels were decoded from, when the
    /// transport has one. Forwarded untouched on the echo track.
    pub encoded: Option<Bytes>,
}

impl VideoFrame {
    /// Frame built from raw pixels with no compressed form
    pub fn raw(sequence: u64, timestamp: u32, buffer: PixelBuffer) -> Self {
        Self {
            sequence,
            timestamp,
            buffer,
            encoded: None,
        }
    }
}
