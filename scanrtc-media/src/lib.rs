//! # ScanRTC Media
//!
//! Media side of ScanRTC: the barcode [`BarcodeDetector`] with its
//! preprocessing chain, H.264 decoding, and the WebRTC transport that feeds
//! decoded frames into `scanrtc-core` sessions.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod detector;
pub mod error;
#[cfg(feature = "h264")]
pub mod h264;
pub mod preprocess;
#[cfg(feature = "h264")]
pub mod rtc;

// Re-export main types
pub use detector::{BarcodeDetector, DetectorConfig};
pub use error::{MediaError, MediaResult};
#[cfg(feature = "h264")]
pub use h264::H264Decoder;
#[cfg(feature = "h264")]
pub use rtc::{WebRtcConfig, WebRtcTransport};
