//! # ScanRTC Signaling
//!
//! HTTP surface of the scanner: the offer/answer exchange that creates a
//! session, a diagnostics listing, and static serving of the browser client.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod server;

// Re-export main types
pub use error::SignalingError;
pub use server::{bind, SignalingServer};
