//! Gateway server - Axum-based HTTP + WS server in front of the router

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router as HttpRouter;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use parley_core::{InboundEvent, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::events::EventBus;
use crate::protocol::{self, DebugSessions, HealthStatus, StopAllResponse, StopResponse};

/// Which provider keys were configured at startup
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyStatus {
    pub openai: bool,
    pub anthropic: bool,
}

/// Shared state for all connections
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<Router>,
    pub events: EventBus,
    pub keys: KeyStatus,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, router: Arc<Router>, keys: KeyStatus) -> Self {
        let state = GatewayState {
            router,
            events: EventBus::new(256),
            keys,
        };
        Self { state, bind }
    }

    /// Build the Axum router
    pub fn routes(&self) -> HttpRouter {
        HttpRouter::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/sessions", get(sessions_handler))
            .route("/api/sessions/{id}/stop", post(stop_session_handler))
            .route("/api/stop", post(stop_all_handler))
            .route("/debug/sessions", get(debug_sessions_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let routes = self.routes();
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            routes.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

// ── HTTP Handlers ──

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    axum::Json(HealthStatus {
        status: "healthy".to_string(),
        active_connections: state.events.subscriber_count(),
        active_collaborations: state.router.active_count(),
        openai_key_configured: state.keys.openai,
        anthropic_key_configured: state.keys.anthropic,
    })
}

async fn sessions_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    axum::Json(protocol::active_sessions(state.router.active_sessions()))
}

async fn stop_session_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<axum::Json<StopResponse>, StatusCode> {
    if !state
        .router
        .stop_session(&id, "Stopped via API", &state.events)
        .await
    {
        return Err(StatusCode::NOT_FOUND);
    }
    info!("Session {} stopped via API", id);
    Ok(axum::Json(StopResponse {
        status: "success".to_string(),
        message: format!("Session {} stopped", id),
    }))
}

async fn stop_all_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let stopped = state
        .router
        .stop_all("Stopped via REST API", &state.events)
        .await;
    info!("Stopped {} session(s) via REST API", stopped.len());
    axum::Json(StopAllResponse::from_stopped(stopped))
}

async fn debug_sessions_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    axum::Json(DebugSessions::from(state.router.debug_snapshot()))
}

// ── WebSocket Handler ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!("WebSocket connection from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

async fn handle_ws(socket: WebSocket, state: GatewayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.events.subscribe();

    // Forward broadcast events to this client
    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("Client {} went away, stopping forwarder", addr);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client {} lagged by {} events", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Client {} sent close", addr);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
        };

        handle_frame(&state, text.as_str());
    }

    send_task.abort();
    info!("Client {} disconnected", addr);
}

/// Echo human messages, then route the event on its own task so a slow
/// agent never holds up a later stop command.
fn handle_frame(state: &GatewayState, raw: &str) -> Option<JoinHandle<()>> {
    let event = match protocol::parse_frame(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("Ignoring malformed frame: {}", e);
            return None;
        }
    };
    if event == InboundEvent::Unknown {
        warn!("Ignoring frame with unknown type");
        return None;
    }

    if let Some(echo) = protocol::echo(&event) {
        state.events.broadcast(protocol::GatewayEvent::new(echo));
    }

    let router = state.router.clone();
    let events = state.events.clone();
    Some(tokio::spawn(async move {
        router.process(event, &events).await;
    }))
}
