//! Transport collaborator interface.
//!
//! The session pipeline does not negotiate ICE/DTLS/SRTP itself. A
//! [`Transport`] creates one [`SessionHandle`] per remote offer and reports
//! everything that happens on it afterwards as [`TransportEvent`]s pushed
//! into the [`EventSink`] it was given. The session consumes those events
//! one at a time, so handlers for one session never run concurrently.

use crate::error::Result;
use crate::frame::VideoFrame;
use crate::session::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session Description Protocol message exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// The SDP content
    pub sdp: String,
    /// Type of SDP: "offer" or "answer"
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "offer".to_string(),
        }
    }

    /// Create an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "answer".to_string(),
        }
    }

    /// Check if this is an offer
    pub fn is_offer(&self) -> bool {
        self.sdp_type == "offer"
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Connection not yet established
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connection failed permanently
    Failed,
    /// Connection closed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Kind of an inbound media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Media arriving from the peer
#[async_trait]
pub trait InboundTrack: Send {
    /// Track identifier
    fn id(&self) -> &str;

    /// Track kind
    fn kind(&self) -> TrackKind;

    /// Next decoded frame; `Ok(None)` once the track has ended
    async fn recv(&mut self) -> Result<Option<VideoFrame>>;

    /// Stop receiving. Subsequent `recv` calls return `Ok(None)`.
    fn stop(&mut self);
}

/// Media sent back to the peer
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    /// Forward one frame
    async fn write(&self, frame: &VideoFrame) -> Result<()>;
}

/// Readiness of a control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not yet open
    Connecting,
    /// Accepting messages
    Open,
    /// Close in progress
    Closing,
    /// Closed
    Closed,
}

/// Auxiliary message channel opened by the peer
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel label chosen by the peer
    fn label(&self) -> &str;

    /// Current readiness
    fn state(&self) -> ChannelState;

    /// Bytes queued in the channel but not yet handed to the network
    async fn buffered_amount(&self) -> usize;

    /// Queue one text message
    async fn send_text(&self, text: String) -> Result<()>;
}

/// Negotiated connection to one peer
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Apply the remote offer
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<()>;

    /// Produce the local answer to the applied offer
    async fn create_local_answer(&self) -> Result<SessionDescription>;

    /// Commit the local answer; returns the description to hand back to
    /// the peer, which may differ from the input once candidates are gathered
    async fn set_local_answer(&self, answer: SessionDescription) -> Result<SessionDescription>;

    /// Add a media track that carries frames back to the peer
    async fn add_outbound_track(&self, kind: TrackKind) -> Result<Arc<dyn OutboundTrack>>;

    /// Close the connection and release transport resources
    async fn close(&self) -> Result<()>;
}

/// Something that happened on a session after it was created
pub enum TransportEvent {
    /// Peer connection state changed
    ConnectionStateChanged(ConnectionState),
    /// The peer started sending a media track
    InboundTrack(Box<dyn InboundTrack>),
    /// The peer opened a control channel and it is ready for messages
    ControlChannelOpen(Arc<dyn ControlChannel>),
    /// The inbound media track ended
    TrackEnded {
        /// Track identifier
        track_id: String,
    },
}

impl TransportEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TransportEvent::ConnectionStateChanged(_) => "connection_state_changed",
            TransportEvent::InboundTrack(_) => "inbound_track",
            TransportEvent::ControlChannelOpen(_) => "control_channel_open",
            TransportEvent::TrackEnded { .. } => "track_ended",
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
            TransportEvent::InboundTrack(track) => f
                .debug_struct("InboundTrack")
                .field("id", &track.id())
                .field("kind", &track.kind())
                .finish(),
            TransportEvent::ControlChannelOpen(channel) => f
                .debug_struct("ControlChannelOpen")
                .field("label", &channel.label())
                .finish(),
            TransportEvent::TrackEnded { track_id } => f
                .debug_struct("TrackEnded")
                .field("track_id", track_id)
                .finish(),
        }
    }
}

/// Where a transport delivers a session's events
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Sink delivering into `tx` for `session_id`
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session_id, tx }
    }

    /// Session the events belong to
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Deliver an event. Returns false once the session stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!(
                    session_id = %self.session_id,
                    event_type,
                    "Event dropped, session no longer listening"
                );
                false
            }
        }
    }
}

/// Creates sessions from remote offers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create the transport side of a new session. Events for the session
    /// must be delivered through `events`.
    async fn create_session(
        &self,
        session_id: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_json_shape() {
        let offer: SessionDescription =
            serde_json::from_str(r#"{"sdp":"v=0\r\n","type":"offer"}"#).unwrap();
        assert!(offer.is_offer());
        assert_eq!(offer.sdp, "v=0\r\n");

        let answer = SessionDescription::answer("v=0\r\n");
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json, serde_json::json!({"sdp": "v=0\r\n", "type": "answer"}));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }

    #[tokio::test]
    async fn test_event_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(SessionId::new(), tx);
        assert!(sink.emit(TransportEvent::ConnectionStateChanged(ConnectionState::Connecting)));
        drop(rx);
        assert!(!sink.emit(TransportEvent::TrackEnded {
            track_id: "video0".to_string()
        }));
    }
}
