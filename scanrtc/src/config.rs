//! Process configuration

use clap::Parser;
use scanrtc_core::PipelineConfig;
use scanrtc_media::{DetectorConfig, WebRtcConfig};
use std::path::PathBuf;
use tracing::Level;

/// Server settings, read from flags or the matching environment variables
#[derive(Debug, Clone, Parser)]
#[command(name = "scanrtc", version, about = "Scan barcodes and QR codes from a browser camera over WebRTC")]
pub struct ServerConfig {
    /// Interface to listen on
    #[arg(long, env = "qr_host", default_value = "localhost")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "qr_port", default_value_t = 5000)]
    pub port: u16,

    /// Log verbosity; `debug` enables debug output, anything else means info
    #[arg(long, env = "qr_verbosity", default_value = "info")]
    pub verbosity: String,

    /// Directory holding `index.html` and the `assets/` bundle
    #[arg(long, env = "qr_static_dir", default_value = "dist")]
    pub static_dir: PathBuf,

    /// STUN/TURN server URLs offered to peers
    #[arg(
        long = "ice-server",
        env = "qr_ice_servers",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    pub ice_servers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            verbosity: "info".to_string(),
            static_dir: PathBuf::from("dist"),
            ice_servers: WebRtcConfig::default().ice_servers,
        }
    }
}

impl ServerConfig {
    /// Level selected by `verbosity`
    pub fn log_level(&self) -> Level {
        if self.verbosity.eq_ignore_ascii_case("debug") {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// WebRTC settings derived from this configuration
    pub fn webrtc(&self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        }
    }

    /// Pipeline settings; not exposed on the command line
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig::default()
    }

    /// Detector settings; the allow-list is fixed
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig::default()
    }
}
