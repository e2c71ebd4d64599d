//! Error types for ScanRTC

use thiserror::Error;

/// Main error type for ScanRTC session and pipeline operations
#[derive(Error, Debug)]
pub enum ScanRtcError {
    /// The remote offer could not be accepted as a session description
    #[error("Invalid offer: {reason}")]
    InvalidOffer {
        /// Why the offer was rejected
        reason: String,
    },

    /// Offer/answer negotiation failed inside the transport
    #[error("Negotiation failed for session {session_id}: {reason}")]
    Negotiation {
        /// Session the negotiation belonged to
        session_id: String,
        /// Reason for negotiation failure
        reason: String,
    },

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// The control channel refused a message because it is closed
    #[error("Control channel {label} is closed")]
    ChannelClosed {
        /// Channel label
        label: String,
    },

    /// Pixel buffer does not match its declared geometry
    #[error("Invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame {
        /// Bytes implied by width, height and pixel format
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// A frame could not be decoded into pixels or symbols
    #[error("Decode error: {reason}")]
    Decode {
        /// Reason for decode failure
        reason: String,
    },

    /// JSON encoding or decoding of the result wire format failed
    #[error("Serialization error: {source}")]
    Serialization {
        /// Underlying serde error
        #[from]
        source: serde_json::Error,
    },

    /// The registry has been drained and accepts no new sessions
    #[error("Session registry is closed")]
    RegistryClosed,

    /// Session not found
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// Session ID
        session_id: String,
    },
}

impl ScanRtcError {
    /// Whether the error is absorbed locally instead of ending the session.
    ///
    /// Decode and channel-send failures only cost one frame's results;
    /// everything else is fatal to the request or session it occurred in.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanRtcError::Decode { .. }
                | ScanRtcError::ChannelClosed { .. }
                | ScanRtcError::InvalidFrame { .. }
        )
    }

    /// Whether the error was caused by the caller's input rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(self, ScanRtcError::InvalidOffer { .. })
    }

    pub(crate) fn transport(reason: impl std::fmt::Display) -> Self {
        ScanRtcError::Transport {
            reason: reason.to_string(),
        }
    }
}

/// Result alias used throughout the core crate
pub type Result<T> = std::result::Result<T, ScanRtcError>;
