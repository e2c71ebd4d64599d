//! HTTP signaling server.
//!
//! Routes:
//! - `POST /api/offer`: body `{"sdp": ..., "type": "offer"}`, answers with
//!   the local description in the same shape
//! - `GET /api/sessions`: live session diagnostics
//! - `GET /`: the client page, `index.html` from the static directory
//! - `GET /assets/*`: bundled client assets

use crate::error::SignalingError;
use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use scanrtc_core::{SessionDescription, SessionInfo, SessionManager};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared state for request handlers
#[derive(Debug, Clone)]
struct AppState {
    manager: SessionManager,
}

/// Serves the offer/answer API and the client page
#[derive(Debug, Clone)]
pub struct SignalingServer {
    manager: SessionManager,
    static_dir: PathBuf,
}

impl SignalingServer {
    /// Create a server answering offers with `manager` and serving the
    /// client from `static_dir`
    pub fn new(manager: SessionManager, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            static_dir: static_dir.into(),
        }
    }

    /// Directory the client page is served from
    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// Build the router. Handlers expect [`ConnectInfo`] to be available.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
        };
        Router::new()
            .route("/api/offer", post(handle_offer))
            .route("/api/sessions", get(list_sessions))
            .route_service("/", ServeFile::new(self.static_dir.join("index.html")))
            .nest_service("/assets", ServeDir::new(self.static_dir.join("assets")))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Sessions are not closed here; the caller owns the manager and shuts
    /// it down once the server has stopped accepting offers.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), SignalingError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("Signaling server listening on http://{}", addr);
        }
        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }
}

/// Bind a listener for `host:port`
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, SignalingError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| SignalingError::Bind { addr, source })
}

async fn handle_offer(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(offer): Json<SessionDescription>,
) -> Result<Json<SessionDescription>, SignalingError> {
    debug!(%remote, "Offer received");
    let negotiated = state.manager.accept_offer(offer, Some(remote)).await?;
    Ok(Json(negotiated.answer))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.sessions())
}
