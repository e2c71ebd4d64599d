//! Media processing error types
//!
//! Errors raised while decoding video, scanning frames for symbols, or
//! driving the WebRTC stack. They convert into [`ScanRtcError`] at the
//! crate boundary so the session pipeline can classify them.

use scanrtc_core::ScanRtcError;
use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Decoding operation failed
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec or symbol reader name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Unsupported format error
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// The WebRTC stack reported an error
    #[error("WebRTC error: {reason}")]
    WebRtc {
        /// Error reported by the stack
        reason: String,
    },
}

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    pub(crate) fn decoding(codec: &str, reason: impl std::fmt::Display) -> Self {
        MediaError::DecodingFailed {
            codec: codec.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<webrtc::Error> for MediaError {
    fn from(e: webrtc::Error) -> Self {
        MediaError::WebRtc {
            reason: e.to_string(),
        }
    }
}

impl From<MediaError> for ScanRtcError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::DecodingFailed { .. } | MediaError::UnsupportedFormat { .. } => {
                ScanRtcError::Decode {
                    reason: e.to_string(),
                }
            }
            MediaError::InvalidFrameData { expected, actual } => {
                ScanRtcError::InvalidFrame { expected, actual }
            }
            MediaError::InvalidConfiguration { .. } | MediaError::WebRtc { .. } => {
                ScanRtcError::Transport {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_stay_recoverable() {
        let err: ScanRtcError = MediaError::decoding("h264", "truncated NAL").into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("truncated NAL"));

        let err: ScanRtcError = MediaError::InvalidFrameData {
            expected: 16,
            actual: 3,
        }
        .into();
        assert!(matches!(
            err,
            ScanRtcError::InvalidFrame {
                expected: 16,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_webrtc_errors_are_transport_errors() {
        let err: ScanRtcError = MediaError::WebRtc {
            reason: "ice failed".to_string(),
        }
        .into();
        assert!(!err.is_recoverable());
        assert!(matches!(err, ScanRtcError::Transport { .. }));
    }
}
