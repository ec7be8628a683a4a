//! HTTP/websocket gateway in front of the broker.
//!
//! Agents connect on `/api/agent/connect`; controllers and tooling use the
//! remaining `/api` routes to list agents and issue commands.

pub mod api;
pub mod types;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::AgentBroker;
use crate::error::GatewayError;

/// How long `shutdown` waits for open connections before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub broker: Arc<AgentBroker>,
}

/// Build the gateway router.
pub fn router(state: GatewayState, cors_permissive: bool) -> Router {
    let api_routes = Router::new()
        .route("/agent/connect", get(ws::agent_connect))
        .route("/agents", get(api::list_agents))
        .route("/agents/{agent_id}", get(api::get_agent))
        .route("/agents/{agent_id}/fault", post(api::inject_fault))
        .route("/agents/{agent_id}/verify", post(api::verify_line))
        .route("/agents/{agent_id}/command", post(api::raw_command));

    let app = Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health_check))
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);

    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// The gateway server.
///
/// `start()` binds the listener and spawns the server task; `shutdown()`
/// stops it gracefully.
pub struct GatewayServer {
    addr: SocketAddr,
    cors_permissive: bool,
    broker: Arc<AgentBroker>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, cors_permissive: bool, broker: Arc<AgentBroker>) -> Self {
        Self {
            addr,
            cors_permissive,
            broker,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server.
    pub async fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        let app = router(
            GatewayState {
                broker: Arc::clone(&self.broker),
            },
            self.cors_permissive,
        );

        let addr = self.addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Gateway listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Gateway shutting down");
                })
                .await
            {
                tracing::error!("Gateway server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    ///
    /// Agent websockets stay open until the agent hangs up, so the wait is
    /// bounded and the task is aborted afterwards.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Gateway did not drain in time, aborting open connections");
                handle.abort();
            }
        }
    }
}
