//! WebRTC transport over webrtc-rs.
//!
//! Each session gets its own `RTCPeerConnection`. Inbound H.264 RTP is
//! reassembled into access units with a sample builder and decoded with
//! [`H264Decoder`]; the encoded access units are echoed back on a static
//! sample track that is added before negotiation so the answer carries it.

use crate::error::MediaError;
use crate::h264::H264Decoder;
use async_trait::async_trait;
use scanrtc_core::{
    ChannelState, ConnectionState, ControlChannel, EventSink, InboundTrack, OutboundTrack,
    Result, ScanRtcError, SessionDescription, SessionHandle, SessionId, TrackKind, Transport,
    TransportEvent, VideoFrame,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const H264_CLOCK_RATE: u32 = 90_000;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const H264_PAYLOAD_TYPE: u8 = 102;
const OPUS_PAYLOAD_TYPE: u8 = 111;
/// Packets the sample builder holds back waiting for reordering
const MAX_LATE_PACKETS: u16 = 256;
const PLI_INTERVAL: Duration = Duration::from_secs(3);
const ECHO_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Configuration for peer connections
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// ICE servers for NAT traversal
    pub ice_servers: Vec<String>,
    /// How long an answer waits for ICE candidate gathering
    pub gathering_timeout: Duration,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout: Duration::from_secs(10),
        }
    }
}

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: H264_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_owned(),
        rtcp_feedback: vec![],
    }
}

/// [`Transport`] that negotiates real WebRTC peer connections
pub struct WebRtcTransport {
    api: API,
    config: WebRtcConfig,
}

impl WebRtcTransport {
    /// Build the WebRTC API: H.264 video, Opus audio, default interceptors
    pub fn new(config: WebRtcConfig) -> std::result::Result<Self, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;
        // Audio is negotiated so browsers that send it still connect; it is never decoded.
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_session(
        &self,
        session_id: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(MediaError::from)?,
        );

        let echo = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_owned(),
            format!("scanrtc-{}", session_id),
        ));
        let sender = pc
            .add_track(Arc::clone(&echo) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(MediaError::from)?;
        // RTCP has to be drained for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        register_callbacks(&pc, session_id, events);

        Ok(Arc::new(WebRtcSession {
            session_id,
            pc,
            echo,
            gathering_timeout: self.config.gathering_timeout,
        }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, session_id: SessionId, events: EventSink) {
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        if let Some(state) = connection_state(state) {
            state_events.emit(TransportEvent::ConnectionStateChanged(state));
        }
        Box::pin(async {})
    }));

    let track_events = events.clone();
    let weak_pc = Arc::downgrade(pc);
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        };
        match WebRtcInboundTrack::new(Arc::clone(&track), kind) {
            Ok(inbound) => {
                if kind == TrackKind::Video {
                    tokio::spawn(request_keyframes(weak_pc.clone(), track.ssrc()));
                }
                track_events.emit(TransportEvent::InboundTrack(Box::new(inbound)));
            }
            Err(e) => warn!(%session_id, error = %e, "Failed to set up inbound track"),
        }
        Box::pin(async {})
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let channel_events = events.clone();
        Box::pin(async move {
            let label = dc.label().to_owned();
            debug!(%session_id, %label, "Data channel announced");

            let opened = Arc::clone(&dc);
            dc.on_open(Box::new(move || {
                channel_events.emit(TransportEvent::ControlChannelOpen(Arc::new(
                    WebRtcControlChannel { dc: opened },
                )));
                Box::pin(async {})
            }));

            // The client only sends keep-alive pings; nothing to answer
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                if msg.is_string {
                    trace!(%session_id, text = %String::from_utf8_lossy(&msg.data), "Ignoring client message");
                }
                Box::pin(async {})
            }));
        })
    }));
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Ask the sender for a keyframe periodically so a decoder that joined late
/// or lost packets can resynchronize.
async fn request_keyframes(pc: Weak<RTCPeerConnection>, media_ssrc: u32) {
    let mut ticker = tokio::time::interval(PLI_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(pc) = pc.upgrade() else { break };
        if matches!(
            pc.connection_state(),
            RTCPeerConnectionState::Closed | RTCPeerConnectionState::Failed
        ) {
            break;
        }
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        if pc.write_rtcp(&[Box::new(pli)]).await.is_err() {
            break;
        }
    }
}

struct WebRtcSession {
    session_id: SessionId,
    pc: Arc<RTCPeerConnection>,
    echo: Arc<TrackLocalStaticSample>,
    gathering_timeout: Duration,
}

#[async_trait]
impl SessionHandle for WebRtcSession {
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<()> {
        let invalid = |e: webrtc::Error| ScanRtcError::InvalidOffer {
            reason: e.to_string(),
        };
        let description = RTCSessionDescription::offer(offer.sdp.clone()).map_err(invalid)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(invalid)
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(MediaError::from)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_answer(&self, answer: SessionDescription) -> Result<SessionDescription> {
        let description = RTCSessionDescription::answer(answer.sdp).map_err(MediaError::from)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .map_err(MediaError::from)?;

        if tokio::time::timeout(self.gathering_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(session_id = %self.session_id, "ICE gathering timed out, answering with partial candidates");
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ScanRtcError::Negotiation {
                session_id: self.session_id.to_string(),
                reason: "no local description after answer".to_string(),
            })?;
        Ok(SessionDescription::answer(local.sdp))
    }

    async fn add_outbound_track(&self, kind: TrackKind) -> Result<Arc<dyn OutboundTrack>> {
        match kind {
            TrackKind::Video => Ok(Arc::new(EchoTrack {
                track: Arc::clone(&self.echo),
            })),
            TrackKind::Audio => Err(ScanRtcError::Transport {
                reason: "only video is echoed".to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        info!(session_id = %self.session_id, "Closing peer connection");
        self.pc.close().await.map_err(MediaError::from)?;
        Ok(())
    }
}

struct EchoTrack {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl OutboundTrack for EchoTrack {
    async fn write(&self, frame: &VideoFrame) -> Result<()> {
        // Frames are forwarded as received; there is no re-encoder
        let Some(encoded) = &frame.encoded else {
            return Ok(());
        };
        let sample = Sample {
            data: encoded.clone(),
            duration: ECHO_FRAME_DURATION,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(MediaError::from)?;
        Ok(())
    }
}

struct WebRtcInboundTrack {
    id: String,
    kind: TrackKind,
    track: Arc<TrackRemote>,
    builder: SampleBuilder<H264Packet>,
    decoder: Option<H264Decoder>,
    stopped: bool,
}

impl WebRtcInboundTrack {
    fn new(track: Arc<TrackRemote>, kind: TrackKind) -> std::result::Result<Self, MediaError> {
        let decoder = match kind {
            TrackKind::Video => Some(H264Decoder::new()?),
            TrackKind::Audio => None,
        };
        Ok(Self {
            id: track.id(),
            kind,
            track,
            builder: SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), H264_CLOCK_RATE),
            decoder,
            stopped: false,
        })
    }
}

#[async_trait]
impl InboundTrack for WebRtcInboundTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&mut self) -> Result<Option<VideoFrame>> {
        loop {
            if self.stopped {
                return Ok(None);
            }
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(None);
            };

            if let Some(sample) = self.builder.pop() {
                match decoder.decode(sample.data, sample.packet_timestamp)? {
                    Some(frame) => return Ok(Some(frame)),
                    None => continue,
                }
            }

            match self.track.read_rtp().await {
                Ok((packet, _)) => self.builder.push(packet),
                Err(e) => {
                    debug!(track_id = %self.id, error = %e, "Track read ended");
                    return Ok(None);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

struct WebRtcControlChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for WebRtcControlChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => {
                ChannelState::Connecting
            }
        }
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc.send_text(text).await.map_err(|e| {
            trace!(label = self.dc.label(), error = %e, "Data channel send failed");
            ScanRtcError::ChannelClosed {
                label: self.dc.label().to_owned(),
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WebRtcConfig::default();
        assert_eq!(config.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(config.gathering_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_connection_state_mapping() {
        assert_eq!(
            connection_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            connection_state(RTCPeerConnectionState::Disconnected),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(connection_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn test_malformed_offer_is_a_client_error() {
        let transport = WebRtcTransport::new(WebRtcConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        })
        .unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = SessionId::new();
        let handle = transport
            .create_session(id, EventSink::new(id, tx))
            .await
            .unwrap();

        let err = handle
            .set_remote_offer(&SessionDescription::offer("not an sdp"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        handle.close().await.unwrap();
    }
}
