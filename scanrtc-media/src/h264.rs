//! H.264 access-unit decoding with openh264

use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use scanrtc_core::{PixelBuffer, PixelFormat, VideoFrame};

const CODEC: &str = "h264";

/// Stateful decoder turning Annex-B access units into I420 frames.
///
/// The decoder keeps reference pictures between calls, so one instance must
/// see every access unit of a stream in order.
pub struct H264Decoder {
    decoder: Decoder,
    sequence: u64,
}

impl H264Decoder {
    /// Create a decoder
    pub fn new() -> MediaResult<Self> {
        let decoder = Decoder::new()
            .map_err(|e| MediaError::decoding(CODEC, format!("Failed to create H.264 decoder: {}", e)))?;
        Ok(Self {
            decoder,
            sequence: 0,
        })
    }

    /// Number of pictures produced so far
    pub fn frames_decoded(&self) -> u64 {
        self.sequence
    }

    /// Decode one access unit.
    ///
    /// Returns `None` while the decoder has no picture to output yet, for
    /// example before the first keyframe. The returned frame keeps the
    /// encoded access unit for re-sending.
    pub fn decode(&mut self, access_unit: Bytes, timestamp: u32) -> MediaResult<Option<VideoFrame>> {
        if access_unit.is_empty() {
            return Ok(None);
        }

        let decoded = self
            .decoder
            .decode(&access_unit)
            .map_err(|e| MediaError::decoding(CODEC, e))?;
        let Some(yuv) = decoded else {
            return Ok(None);
        };

        let buffer = copy_i420(&yuv)?;
        let frame = VideoFrame {
            sequence: self.sequence,
            timestamp,
            buffer,
            encoded: Some(access_unit),
        };
        self.sequence += 1;
        Ok(Some(frame))
    }
}

impl std::fmt::Debug for H264Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Decoder")
            .field("frames_decoded", &self.sequence)
            .finish()
    }
}

/// Pack the decoder's strided planes into a contiguous I420 buffer
fn copy_i420(yuv: &impl YUVSource) -> MediaResult<PixelBuffer> {
    let (width, height) = yuv.dimensions();
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    let mut data = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);
    copy_plane(&mut data, yuv.y(), y_stride, width, height)?;
    copy_plane(&mut data, yuv.u(), u_stride, chroma_width, chroma_height)?;
    copy_plane(&mut data, yuv.v(), v_stride, chroma_width, chroma_height)?;

    PixelBuffer::new(width as u32, height as u32, PixelFormat::I420, data)
        .map_err(|e| MediaError::decoding(CODEC, e))
}

fn copy_plane(
    out: &mut Vec<u8>,
    plane: &[u8],
    stride: usize,
    width: usize,
    height: usize,
) -> MediaResult<()> {
    for row in 0..height {
        let start = row * stride;
        let line = plane
            .get(start..start + width)
            .ok_or(MediaError::InvalidFrameData {
                expected: (height - 1) * stride + width,
                actual: plane.len(),
            })?;
        out.extend_from_slice(line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_plane_drops_stride_padding() {
        let plane = [1, 2, 0, 0, 3, 4, 0, 0];
        let mut out = Vec::new();
        copy_plane(&mut out, &plane, 4, 2, 2).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_plane_rejects_short_plane() {
        let mut out = Vec::new();
        let err = copy_plane(&mut out, &[1, 2, 3], 4, 2, 2).unwrap_err();
        assert!(matches!(err, MediaError::InvalidFrameData { expected: 6, actual: 3 }));
    }

    #[test]
    fn test_empty_access_unit_yields_nothing() {
        let mut decoder = H264Decoder::new().unwrap();
        assert!(decoder.decode(Bytes::new(), 0).unwrap().is_none());
        assert_eq!(decoder.frames_decoded(), 0);
    }
}
