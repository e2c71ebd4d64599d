//! Session creation, negotiation, and event handling

use crate::config::PipelineConfig;
use crate::detection::Detector;
use crate::error::{Result, ScanRtcError};
use crate::registry::{SessionRegistry, ShutdownReport};
use crate::session::{Pipeline, Session, SessionId, SessionInfo, SessionState};
use crate::transport::{EventSink, SessionDescription, Transport, TransportEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Result of a successful offer/answer exchange
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Session created for the offer
    pub session_id: SessionId,
    /// Local answer to return to the peer
    pub answer: SessionDescription,
}

/// Creates a session per remote offer and drives each session's events.
///
/// Every session gets one event task that applies transport events in
/// arrival order, so track and channel handlers for the same session never
/// interleave. Sessions are independent of each other.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    registry: SessionRegistry,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("pipeline", &self.pipeline)
            .field("registry", &self.registry)
            .finish()
    }
}

impl SessionManager {
    /// Create a manager with default pipeline settings
    pub fn new(transport: Arc<dyn Transport>, detector: Arc<dyn Detector>) -> Self {
        Self::with_config(transport, detector, PipelineConfig::default())
    }

    /// Create a manager with custom pipeline settings
    pub fn with_config(
        transport: Arc<dyn Transport>,
        detector: Arc<dyn Detector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transport,
            pipeline: Arc::new(Pipeline { detector, config }),
            registry: SessionRegistry::new(),
        }
    }

    /// Registry of live sessions
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Diagnostics for every live session
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    /// Create a session for a remote offer and return the local answer.
    ///
    /// On any failure the session, if it was created, is closed and
    /// discarded before the error is returned.
    pub async fn accept_offer(
        &self,
        offer: SessionDescription,
        remote: Option<SocketAddr>,
    ) -> Result<Negotiated> {
        validate_offer(&offer)?;
        if self.registry.is_drained() {
            return Err(ScanRtcError::RegistryClosed);
        }

        let session_id = SessionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .transport
            .create_session(session_id, EventSink::new(session_id, tx.clone()))
            .await?;
        let session = Arc::new(Session::new(session_id, handle, tx));

        if let Err(e) = self.registry.add(&session) {
            if let Err(close_err) = session.close(SessionState::Closed).await {
                debug!(%session_id, error = %close_err, "Close after rejected registration failed");
            }
            return Err(e);
        }
        session.transition(SessionState::Negotiating);
        match remote {
            Some(remote) => info!(%session_id, %remote, "Created for {}", remote),
            None => info!(%session_id, "Created"),
        }

        tokio::spawn(drive_session(
            Arc::clone(&session),
            rx,
            Arc::clone(&self.pipeline),
            self.registry.clone(),
        ));

        match negotiate(&session, &offer).await {
            Ok(answer) => Ok(Negotiated { session_id, answer }),
            Err(e) => {
                warn!(%session_id, error = %e, "Negotiation failed");
                if let Err(close_err) = session.close(SessionState::Closed).await {
                    debug!(%session_id, error = %close_err, "Close after failed negotiation failed");
                }
                self.registry.discard(session_id);
                Err(e)
            }
        }
    }

    /// Close one session explicitly
    pub async fn close_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| ScanRtcError::SessionNotFound {
                session_id: id.to_string(),
            })?;
        let result = session.close(SessionState::Closed).await;
        self.registry.discard(id);
        result
    }

    /// Close every live session. Called once at process shutdown.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.registry.close_all().await
    }
}

fn validate_offer(offer: &SessionDescription) -> Result<()> {
    if !offer.is_offer() {
        return Err(ScanRtcError::InvalidOffer {
            reason: format!("expected type \"offer\", got \"{}\"", offer.sdp_type),
        });
    }
    if offer.sdp.trim().is_empty() {
        return Err(ScanRtcError::InvalidOffer {
            reason: "empty sdp".to_string(),
        });
    }
    Ok(())
}

async fn negotiate(session: &Session, offer: &SessionDescription) -> Result<SessionDescription> {
    let handle = session.handle();
    let exchange = async {
        handle.set_remote_offer(offer).await?;
        let answer = handle.create_local_answer().await?;
        handle.set_local_answer(answer).await
    };
    exchange.await.map_err(|e| match e {
        ScanRtcError::InvalidOffer { .. } => e,
        other => ScanRtcError::Negotiation {
            session_id: session.id().to_string(),
            reason: other.to_string(),
        },
    })
}

async fn drive_session(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    pipeline: Arc<Pipeline>,
    registry: SessionRegistry,
) {
    let session_id = session.id();
    let cancel = session.cancellation();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        trace!(%session_id, event_type = event.event_type(), "Session event");

        let teardown = match event {
            TransportEvent::ConnectionStateChanged(state) => session.on_connection_state(state),
            TransportEvent::InboundTrack(track) => {
                session.attach_track(track, &pipeline).await;
                None
            }
            TransportEvent::ControlChannelOpen(channel) => {
                session.attach_channel(channel, &pipeline.config);
                None
            }
            TransportEvent::TrackEnded { track_id } => session.on_track_ended(&track_id),
        };

        if let Some(final_state) = teardown {
            if let Err(e) = session.close(final_state).await {
                warn!(%session_id, error = %e, "Failed to close session");
            }
            registry.discard(session_id);
            break;
        }
    }

    debug!(%session_id, "Session event loop stopped");
}
