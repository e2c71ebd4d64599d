//! One peer's session: lifecycle state plus its media and result bindings

use crate::config::PipelineConfig;
use crate::detection::Detector;
use crate::error::{Result, ScanRtcError};
use crate::frame_tap::FrameTap;
use crate::result_channel::{ChannelSlot, ResultChannel, ResultStats};
use crate::transport::{
    ConnectionState, ControlChannel, InboundTrack, OutboundTrack, SessionHandle, TrackKind,
    TransportEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque session identifier, used for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session lifecycle state.
///
/// `New -> Negotiating -> Connected -> {Disconnected, Failed, Closed}`.
/// `Failed` and `Closed` are terminal and release every resource.
/// `Disconnected` ends media processing but leaves the session open until
/// it is closed explicitly or the transport reports a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, offer not applied yet
    New,
    /// Offer/answer and ICE in progress
    Negotiating,
    /// Transport reported connected
    Connected,
    /// Connectivity lost; no more media is processed
    Disconnected,
    /// Transport failed; session torn down
    Failed,
    /// Closed by track end, transport close, or shutdown
    Closed,
}

impl SessionState {
    /// Whether the session has been torn down
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    /// Whether new media may still be attached
    pub fn accepts_media(self) -> bool {
        !self.is_terminal() && self != SessionState::Disconnected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Tapped video track, if any
    pub track_id: Option<String>,
    /// Result channel label, if open
    pub channel_label: Option<String>,
    /// Frames pulled through the current tap
    pub frames_processed: u64,
    /// Delivery counters of the current result channel
    pub results: ResultStats,
}

/// Detector and tuning shared by every session of a manager
#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    pub(crate) detector: Arc<dyn Detector>,
    pub(crate) config: PipelineConfig,
}

struct MediaSubscription {
    track_id: String,
    frames: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Binding {
    media: Option<MediaSubscription>,
    results: Option<Arc<ResultChannel>>,
}

/// One peer's negotiated connection with its tapped media track and result
/// channel.
///
/// The track and the channel arrive independently and in either order. Both
/// attach paths take the same binding lock and bind the channel to the tap
/// as soon as both exist, so the pair is wired exactly once whichever comes
/// last.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    handle: Arc<dyn SessionHandle>,
    state: RwLock<SessionState>,
    binding: Mutex<Binding>,
    slot: Arc<ChannelSlot>,
    cancel: CancellationToken,
    closed: OnceCell<std::result::Result<(), String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        handle: Arc<dyn SessionHandle>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            handle,
            state: RwLock::new(SessionState::New),
            binding: Mutex::new(Binding::default()),
            slot: Arc::new(ChannelSlot::new()),
            cancel: CancellationToken::new(),
            closed: OnceCell::new(),
            events,
        }
    }

    /// Session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transport handle
    pub fn handle(&self) -> &Arc<dyn SessionHandle> {
        &self.handle
    }

    /// Whether a tap is currently delivering into a result channel
    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    /// Snapshot for diagnostics
    pub fn info(&self) -> SessionInfo {
        let binding = self.binding.lock();
        SessionInfo {
            id: self.id,
            state: self.state(),
            created_at: self.created_at,
            track_id: binding.media.as_ref().map(|m| m.track_id.clone()),
            channel_label: binding.results.as_ref().map(|r| r.label().to_string()),
            frames_processed: binding
                .media
                .as_ref()
                .map(|m| m.frames.load(Ordering::Relaxed))
                .unwrap_or(0),
            results: binding
                .results
                .as_ref()
                .map(|r| r.stats())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move to `next` unless the session is already terminal or the move
    /// would revive media after a disconnect
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if state.is_terminal() {
            return false;
        }
        if *state == SessionState::Disconnected
            && matches!(next, SessionState::Negotiating | SessionState::Connected)
        {
            return false;
        }
        *state = next;
        true
    }

    /// Apply a transport connection state. Returns the terminal state to
    /// tear down into, if the change ends the session.
    pub(crate) fn on_connection_state(&self, state: ConnectionState) -> Option<SessionState> {
        info!(session_id = %self.id, %state, "Connection state is {}", state);
        match state {
            ConnectionState::New | ConnectionState::Connecting => None,
            ConnectionState::Connected => {
                if !self.transition(SessionState::Connected) {
                    debug!(session_id = %self.id, current = %self.state(), "Ignoring connected event");
                }
                None
            }
            ConnectionState::Disconnected => {
                if self.transition(SessionState::Disconnected) {
                    self.stop_media();
                }
                None
            }
            ConnectionState::Failed => Some(SessionState::Failed),
            ConnectionState::Closed => Some(SessionState::Closed),
        }
    }

    /// Handle the end of an inbound track. Only the currently tapped track
    /// closes the session; a replaced track ending is ignored.
    pub(crate) fn on_track_ended(&self, track_id: &str) -> Option<SessionState> {
        let current = self
            .binding
            .lock()
            .media
            .as_ref()
            .map(|m| m.track_id == track_id)
            .unwrap_or(false);
        if current {
            info!(session_id = %self.id, track_id, "Track video ended");
            Some(SessionState::Closed)
        } else {
            debug!(session_id = %self.id, track_id, "Ignoring end of untapped track");
            None
        }
    }

    /// Tap an inbound track and start its frame loop
    pub(crate) async fn attach_track(&self, mut track: Box<dyn InboundTrack>, pipeline: &Pipeline) {
        let track_id = track.id().to_string();
        let kind = track.kind();
        info!(session_id = %self.id, %track_id, %kind, "Track {} received", kind);

        if kind != TrackKind::Video {
            debug!(session_id = %self.id, %track_id, "Only video tracks are scanned");
            track.stop();
            return;
        }
        if !self.state().accepts_media() {
            debug!(session_id = %self.id, %track_id, state = %self.state(), "Session no longer accepts media");
            track.stop();
            return;
        }

        let outbound = match self.handle.add_outbound_track(TrackKind::Video).await {
            Ok(outbound) => Some(outbound),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to add echo track, continuing without it");
                None
            }
        };

        let tap = FrameTap::new(
            track,
            Arc::clone(&pipeline.detector),
            Arc::clone(&self.slot),
            &pipeline.config,
        );
        let frames = tap.frame_counter();
        let cancel = self.cancel.child_token();

        let previous = {
            let mut binding = self.binding.lock();
            if self.cancel.is_cancelled() {
                return;
            }
            if let Some(results) = &binding.results {
                self.slot.bind(Arc::clone(results));
            }
            let task = tokio::spawn(run_frame_loop(
                self.id,
                tap,
                outbound,
                cancel.clone(),
                self.events.clone(),
            ));
            binding.media.replace(MediaSubscription {
                track_id,
                frames,
                cancel,
                task,
            })
        };

        if let Some(previous) = previous {
            debug!(session_id = %self.id, track_id = %previous.track_id, "Replacing previous video track");
            previous.cancel.cancel();
        }
    }

    /// Wrap an opened control channel as this session's result channel
    pub(crate) fn attach_channel(&self, channel: Arc<dyn ControlChannel>, config: &PipelineConfig) {
        let label = channel.label().to_string();
        if self.state().is_terminal() {
            debug!(session_id = %self.id, %label, "Ignoring channel on closed session");
            return;
        }

        let results = Arc::new(ResultChannel::new(
            channel,
            config.max_buffered_bytes,
            config.send_empty,
        ));
        let (previous, bound) = {
            let mut binding = self.binding.lock();
            if self.cancel.is_cancelled() {
                return;
            }
            let bound = binding.media.is_some();
            if bound {
                self.slot.bind(Arc::clone(&results));
            }
            (binding.results.replace(results), bound)
        };

        if let Some(previous) = previous {
            previous.close();
        }
        info!(session_id = %self.id, %label, bound, "Control channel open");
    }

    fn stop_media(&self) {
        let media = self.binding.lock().media.take();
        self.slot.clear();
        if let Some(media) = media {
            debug!(session_id = %self.id, track_id = %media.track_id, "Stopping media processing");
            media.cancel.cancel();
        }
    }

    /// Tear the session down into `final_state` and close the transport.
    ///
    /// Only the first call does any work. Concurrent and later callers wait
    /// for that close to finish and share its outcome, so when this returns
    /// the frame loop has stopped and the transport close has completed.
    pub async fn close(&self, final_state: SessionState) -> Result<()> {
        let mut first = None;
        let slot = &mut first;
        let outcome = self
            .closed
            .get_or_init(|| async move {
                let result = self.teardown(final_state).await;
                let shared = result.as_ref().map(|_| ()).map_err(ToString::to_string);
                *slot = Some(result);
                shared
            })
            .await;

        match first {
            Some(result) => result,
            None => outcome.clone().map_err(ScanRtcError::transport),
        }
    }

    async fn teardown(&self, final_state: SessionState) -> Result<()> {
        *self.state.write() = final_state;
        self.cancel.cancel();

        let (media, results) = {
            let mut binding = self.binding.lock();
            (binding.media.take(), binding.results.take())
        };
        self.slot.clear();
        if let Some(results) = results {
            results.close();
        }
        if let Some(media) = media {
            if let Err(e) = media.task.await {
                debug!(session_id = %self.id, error = %e, "Frame loop ended abnormally");
            }
        }

        info!(session_id = %self.id, state = %final_state, "Closing session");
        self.handle.close().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("bound", &self.is_bound())
            .finish()
    }
}

async fn run_frame_loop(
    session_id: SessionId,
    mut tap: FrameTap,
    outbound: Option<Arc<dyn OutboundTrack>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let track_id = tap.track_id().to_string();
    debug!(%session_id, %track_id, "Frame loop started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = tap.recv() => next,
        };

        match next {
            Ok(Some(frame)) => {
                if let Some(outbound) = &outbound {
                    if let Err(e) = outbound.write(&frame).await {
                        debug!(%session_id, error = %e, "Echo write failed");
                    }
                }
            }
            Ok(None) => {
                let _ = events.send(TransportEvent::TrackEnded {
                    track_id: track_id.clone(),
                });
                break;
            }
            Err(e) if e.is_recoverable() => {
                debug!(%session_id, %track_id, error = %e, "Skipping unreadable frame");
            }
            Err(e) => {
                warn!(%session_id, %track_id, error = %e, "Inbound track failed");
                let _ = events.send(TransportEvent::TrackEnded {
                    track_id: track_id.clone(),
                });
                break;
            }
        }
    }

    tap.stop();
    debug!(%session_id, %track_id, "Frame loop stopped");
}
