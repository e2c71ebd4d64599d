//! # ScanRTC - Real-Time Barcode Scanning over WebRTC
//!
//! A browser streams its camera to the server over WebRTC. Every decoded
//! frame is scanned for barcodes and QR codes, and the results go back to
//! the browser on the peer's data channel as a JSON array while the video
//! is echoed back unchanged.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanrtc::{ScanRtc, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = ScanRtc::init_with(ServerConfig::default())?;
//!     let report = scanner
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("closed {} sessions", report.total());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;

pub use config::ServerConfig;

// Re-export core types for easy access
pub use scanrtc_core::{
    BoundingBox, Detection, Detector, PipelineConfig, PixelBuffer, ScanRtcError, SessionId,
    SessionInfo, SessionManager, SessionState, ShutdownReport, Symbology, VideoFrame,
};
pub use scanrtc_media::{BarcodeDetector, DetectorConfig, MediaError, WebRtcConfig, WebRtcTransport};
pub use scanrtc_signaling::{SignalingError, SignalingServer};

use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A configured scanner: WebRTC transport, barcode detector, and the
/// session manager tying them together
#[derive(Debug)]
pub struct ScanRtc {
    config: ServerConfig,
    manager: SessionManager,
}

impl ScanRtc {
    /// Initialize with default settings
    pub fn init() -> Result<Self, ScanRtcError> {
        Self::init_with(ServerConfig::default())
    }

    /// Initialize with custom configuration
    pub fn init_with(config: ServerConfig) -> Result<Self, ScanRtcError> {
        let transport = WebRtcTransport::new(config.webrtc())?;
        let detector = BarcodeDetector::with_config(config.detector())?;
        let manager =
            SessionManager::with_config(Arc::new(transport), Arc::new(detector), config.pipeline());
        Ok(Self { config, manager })
    }

    /// Session manager, for introspection
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Configuration in use
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until `shutdown` resolves, then close every session.
    ///
    /// Sessions are closed even when the server stops with an error; the
    /// error is returned after they are.
    pub async fn serve<F>(self, shutdown: F) -> Result<ShutdownReport, SignalingError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = scanrtc_signaling::bind(&self.config.host, self.config.port).await?;
        let served = SignalingServer::new(self.manager.clone(), &self.config.static_dir)
            .serve(listener, shutdown)
            .await;
        finish_serving(&self.manager, served).await
    }
}

async fn finish_serving(
    manager: &SessionManager,
    served: Result<(), SignalingError>,
) -> Result<ShutdownReport, SignalingError> {
    let report = manager.shutdown().await;
    info!(
        closed = report.closed.len(),
        failed = report.failed.len(),
        "Shutdown complete"
    );
    served.map(|()| report)
}
