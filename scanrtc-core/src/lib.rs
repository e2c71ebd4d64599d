//! # ScanRTC Core
//!
//! Per-session media pipeline for the ScanRTC barcode scanner. Each remote
//! peer gets a session whose inbound video track is tapped frame by frame.
//! Every frame is handed to a [`Detector`] and the detections are sent back
//! to the peer over its control channel as a JSON array, while the frame
//! itself continues to the outbound echo track.
//!
//! Negotiation and media transport live behind the [`Transport`] trait; the
//! `scanrtc-media` crate provides the WebRTC implementation and
//! [`loopback`] provides an in-process one for tests.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod frame_tap;
pub mod loopback;
pub mod manager;
pub mod registry;
pub mod result_channel;
pub mod session;
pub mod transport;
pub mod wire;

// Re-export main types
pub use config::PipelineConfig;
pub use detection::{BoundingBox, Detection, Detector, Symbology};
pub use error::{Result, ScanRtcError};
pub use frame::{PixelBuffer, PixelFormat, VideoFrame};
pub use frame_tap::FrameTap;
pub use manager::{Negotiated, SessionManager};
pub use registry::{SessionRegistry, ShutdownReport};
pub use result_channel::{ChannelSlot, DropReason, ResultChannel, ResultStats, SendOutcome};
pub use session::{Session, SessionId, SessionInfo, SessionState};
pub use transport::{
    ChannelState, ConnectionState, ControlChannel, EventSink, InboundTrack, OutboundTrack,
    SessionDescription, SessionHandle, TrackKind, Transport, TransportEvent,
};
pub use wire::{decode_detections, encode_detections};
