//! In-process transport for tests and local tooling.
//!
//! [`LoopbackTransport`] hands out a [`LoopbackPeer`] for every session it
//! creates. The peer plays the browser side: it drives connection state,
//! opens the control channel, publishes tracks, and reads back whatever the
//! session sends.

use crate::error::{Result, ScanRtcError};
use crate::frame::VideoFrame;
use crate::session::SessionId;
use crate::transport::{
    ChannelState, ConnectionState, ControlChannel, EventSink, InboundTrack, OutboundTrack,
    SessionDescription, SessionHandle, TrackKind, Transport, TransportEvent,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport whose peers live in the same process
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    peers: Mutex<VecDeque<LoopbackPeer>>,
    fail_next: AtomicBool,
    created: AtomicUsize,
}

impl LoopbackTransport {
    /// Create a transport with no pending peers
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest peer not yet claimed
    pub fn next_peer(&self) -> Option<LoopbackPeer> {
        self.peers.lock().pop_front()
    }

    /// Make the next `create_session` call fail
    pub fn fail_next_session(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of sessions created so far
    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn create_session(
        &self,
        session_id: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanRtcError::transport("loopback refused session"));
        }

        let (echo_tx, echo_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PeerShared {
            session_id,
            events,
            remote: Mutex::new(None),
            echo_tx,
            echo_rx: Mutex::new(Some(echo_rx)),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            close_delay_ms: AtomicU64::new(0),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().push_back(LoopbackPeer {
            shared: Arc::clone(&shared),
        });
        Ok(Arc::new(LoopbackHandle { shared }))
    }
}

#[derive(Debug)]
struct PeerShared {
    session_id: SessionId,
    events: EventSink,
    remote: Mutex<Option<SessionDescription>>,
    echo_tx: mpsc::UnboundedSender<VideoFrame>,
    echo_rx: Mutex<Option<mpsc::UnboundedReceiver<VideoFrame>>>,
    closed: AtomicBool,
    fail_close: AtomicBool,
    close_delay_ms: AtomicU64,
}

/// Remote side of a loopback session
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    shared: Arc<PeerShared>,
}

impl LoopbackPeer {
    /// Session this peer is connected to
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    /// Offer the session received, once negotiation got that far
    pub fn remote_offer(&self) -> Option<SessionDescription> {
        self.shared.remote.lock().clone()
    }

    /// Report a connection state change to the session
    pub fn set_connection_state(&self, state: ConnectionState) -> bool {
        self.shared
            .events
            .emit(TransportEvent::ConnectionStateChanged(state))
    }

    /// Open a control channel and return the peer's end of it
    pub fn open_control_channel(&self, label: &str) -> RemoteChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(LoopbackChannel {
            label: label.to_string(),
            state: RwLock::new(ChannelState::Open),
            buffered: AtomicUsize::new(0),
            tx,
        });
        self.shared
            .events
            .emit(TransportEvent::ControlChannelOpen(channel.clone()));
        RemoteChannel { channel, rx }
    }

    /// Publish a video track and return the sender that feeds it
    pub fn publish_video_track(&self, track_id: &str) -> FrameSender {
        self.publish_track(track_id, TrackKind::Video)
    }

    /// Publish an audio track. Frames sent on it are never scanned.
    pub fn publish_audio_track(&self, track_id: &str) -> FrameSender {
        self.publish_track(track_id, TrackKind::Audio)
    }

    fn publish_track(&self, track_id: &str, kind: TrackKind) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let track = LoopbackTrack {
            id: track_id.to_string(),
            kind,
            rx,
            stopped: Arc::clone(&stopped),
        };
        self.shared
            .events
            .emit(TransportEvent::InboundTrack(Box::new(track)));
        FrameSender {
            tx: Some(tx),
            stopped,
        }
    }

    /// Report that a track ended without closing its sender
    pub fn end_track(&self, track_id: &str) -> bool {
        self.shared.events.emit(TransportEvent::TrackEnded {
            track_id: track_id.to_string(),
        })
    }

    /// Frames the session echoed back. Only the first call gets the receiver.
    pub fn echo_frames(&self) -> Option<mpsc::UnboundedReceiver<VideoFrame>> {
        self.shared.echo_rx.lock().take()
    }

    /// Make the session's transport close report an error
    pub fn fail_close(&self) {
        self.shared.fail_close.store(true, Ordering::SeqCst);
    }

    /// Make the session's transport close take `delay` before it completes
    pub fn delay_close(&self, delay: Duration) {
        self.shared
            .close_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether the session closed its transport
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct LoopbackHandle {
    shared: Arc<PeerShared>,
}

#[async_trait]
impl SessionHandle for LoopbackHandle {
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<()> {
        if !offer.sdp.starts_with("v=0") {
            return Err(ScanRtcError::InvalidOffer {
                reason: "sdp must start with a version line".to_string(),
            });
        }
        *self.shared.remote.lock() = Some(offer.clone());
        Ok(())
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        if self.shared.remote.lock().is_none() {
            return Err(ScanRtcError::transport("no remote offer"));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=loopback 0 0 IN IP4 127.0.0.1\r\ns={}\r\n",
            self.shared.session_id
        )))
    }

    async fn set_local_answer(&self, answer: SessionDescription) -> Result<SessionDescription> {
        Ok(answer)
    }

    async fn add_outbound_track(&self, kind: TrackKind) -> Result<Arc<dyn OutboundTrack>> {
        match kind {
            TrackKind::Video => Ok(Arc::new(LoopbackOutbound {
                tx: self.shared.echo_tx.clone(),
            })),
            TrackKind::Audio => Err(ScanRtcError::transport("loopback echoes video only")),
        }
    }

    async fn close(&self) -> Result<()> {
        let delay = self.shared.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.shared.closed.store(true, Ordering::SeqCst);
        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(ScanRtcError::transport("loopback close failed"));
        }
        Ok(())
    }
}

struct LoopbackOutbound {
    tx: mpsc::UnboundedSender<VideoFrame>,
}

#[async_trait]
impl OutboundTrack for LoopbackOutbound {
    async fn write(&self, frame: &VideoFrame) -> Result<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| ScanRtcError::transport("echo receiver dropped"))
    }
}

struct LoopbackTrack {
    id: String,
    kind: TrackKind,
    rx: mpsc::UnboundedReceiver<Result<VideoFrame>>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl InboundTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&mut self) -> Result<Option<VideoFrame>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(frame) => frame.map(Some),
            None => Ok(None),
        }
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

/// Feeds frames into a published loopback track
#[derive(Debug)]
pub struct FrameSender {
    tx: Option<mpsc::UnboundedSender<Result<VideoFrame>>>,
    stopped: Arc<AtomicBool>,
}

impl FrameSender {
    /// Queue a frame. Returns false once the track stopped reading.
    pub fn send(&self, frame: VideoFrame) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Queue a receive error
    pub fn send_error(&self, error: ScanRtcError) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// End the track; the session sees end of stream after queued frames
    pub fn end(&mut self) {
        self.tx = None;
    }

    /// Whether the session stopped the track
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct LoopbackChannel {
    label: String,
    state: RwLock<ChannelState>,
    buffered: AtomicUsize,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ControlChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if *self.state.read() != ChannelState::Open {
            return Err(ScanRtcError::ChannelClosed {
                label: self.label.clone(),
            });
        }
        self.tx.send(text).map_err(|_| ScanRtcError::ChannelClosed {
            label: self.label.clone(),
        })
    }
}

/// Peer's end of a loopback control channel
#[derive(Debug)]
pub struct RemoteChannel {
    channel: Arc<LoopbackChannel>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl RemoteChannel {
    /// Next message the session sent
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Message already delivered, if any
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Pretend the session's side has this many bytes queued
    pub fn set_buffered(&self, bytes: usize) {
        self.channel.buffered.store(bytes, Ordering::SeqCst);
    }

    /// Close the channel from the peer side
    pub fn close(&self) {
        *self.channel.state.write() = ChannelState::Closed;
    }
}
