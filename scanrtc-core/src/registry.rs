//! Process-wide set of live sessions

use crate::error::{Result, ScanRtcError};
use crate::session::{Session, SessionId, SessionInfo, SessionState};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Outcome of [`SessionRegistry::close_all`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Sessions that closed cleanly
    pub closed: Vec<SessionId>,
    /// Sessions whose transport close failed, with the error message
    pub failed: Vec<(SessionId, String)>,
}

impl ShutdownReport {
    /// Number of sessions the shutdown attempted to close
    pub fn total(&self) -> usize {
        self.closed.len() + self.failed.len()
    }
}

/// Membership of every live session, keyed by ID.
///
/// Entries are non-owning: a session lives as long as its event loop does,
/// and the registry only needs to find it for bulk teardown. All operations
/// are safe to call from any task.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: DashMap<SessionId, Weak<Session>>,
    // Held shared across every insert and exclusively while draining, so
    // no add can slip in between the drain and the final snapshot
    drained: RwLock<bool>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Fails once the registry has been drained.
    pub fn add(&self, session: &Arc<Session>) -> Result<()> {
        let drained = self.inner.drained.read();
        if *drained {
            return Err(ScanRtcError::RegistryClosed);
        }
        self.inner
            .sessions
            .insert(session.id(), Arc::downgrade(session));
        drop(drained);
        debug!(session_id = %session.id(), live = self.len(), "Session registered");
        Ok(())
    }

    /// Remove a session. Removing an absent session is a no-op.
    pub fn discard(&self, id: SessionId) -> bool {
        let removed = self.inner.sessions.remove(&id).is_some();
        if removed {
            debug!(session_id = %id, live = self.len(), "Session discarded");
        }
        removed
    }

    /// Look up a live session
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .get(&id)
            .and_then(|entry| entry.value().upgrade())
    }

    /// Whether the session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Whether `close_all` has run
    pub fn is_drained(&self) -> bool {
        *self.inner.drained.read()
    }

    /// Diagnostics for every live session
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.live().iter().map(|session| session.info()).collect()
    }

    fn live(&self) -> Vec<Arc<Session>> {
        self.inner
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Close every session concurrently and empty the registry.
    ///
    /// A failing close is logged and reported; it never prevents the other
    /// sessions from closing. After this the registry refuses new sessions.
    pub async fn close_all(&self) -> ShutdownReport {
        let sessions = {
            let mut drained = self.inner.drained.write();
            if *drained {
                return ShutdownReport::default();
            }
            *drained = true;
            let sessions = self.live();
            self.inner.sessions.clear();
            sessions
        };
        info!(count = sessions.len(), "Closing all sessions");

        let results = futures::future::join_all(sessions.iter().map(|session| async move {
            (session.id(), session.close(SessionState::Closed).await)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.closed.push(id),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to close session");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{OutboundTrack, SessionDescription, SessionHandle, TrackKind};
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    struct IdleHandle;

    #[async_trait]
    impl SessionHandle for IdleHandle {
        async fn set_remote_offer(&self, _offer: &SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn create_local_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0\r\n"))
        }

        async fn set_local_answer(&self, answer: SessionDescription) -> Result<SessionDescription> {
            Ok(answer)
        }

        async fn add_outbound_track(&self, _kind: TrackKind) -> Result<Arc<dyn OutboundTrack>> {
            Err(ScanRtcError::transport("no outbound tracks"))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new(SessionId::new(), Arc::new(IdleHandle), tx))
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = session();
        assert_ok!(registry.add(&session));
        assert!(registry.contains(session.id()));

        assert!(registry.discard(session.id()));
        assert!(!registry.discard(session.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_add_after_close_all_is_refused() {
        let registry = SessionRegistry::new();
        let session = session();
        assert_ok!(registry.add(&session));

        let report = registry.close_all().await;
        assert_eq!(report.closed, vec![session.id()]);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_drained());

        let late = self::session();
        assert_err!(registry.add(&late));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sessions_added_during_close_all_are_never_orphaned() {
        let registry = SessionRegistry::new();
        let adders: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let session = session();
                    let added = registry.add(&session).is_ok();
                    (session, added)
                })
            })
            .collect();
        let report = registry.close_all().await;

        let mut added = 0;
        for adder in adders {
            let (session, ok) = adder.await.unwrap();
            if ok {
                added += 1;
                assert_eq!(session.state(), SessionState::Closed);
            } else {
                assert_eq!(session.state(), SessionState::New);
            }
        }
        assert_eq!(report.total(), added);
        assert!(registry.is_empty());
    }
}
