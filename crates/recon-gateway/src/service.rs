//! Command gateway service: HTTP listener, background sweeps and lifecycle.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::adapters::queue;
use crate::bridge::CommandBridge;
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::handler::GatewayHandler;
use crate::middleware::{rate_limit, replay, ClientIpLayer, RateLimitState, ReplayGuard};
use crate::ports::{ExecutionHost, OfflineQueue, OutputCapture, TimeSource, UserDirectory};

/// Collaborators supplied by the embedding process.
pub struct GatewayDependencies {
    pub directory: Arc<dyn UserDirectory>,
    pub queue: Arc<dyn OfflineQueue>,
    pub host: Arc<dyn ExecutionHost>,
    pub capture: Arc<dyn OutputCapture>,
    pub clock: Arc<dyn TimeSource>,
    /// Actor arrivals; each triggers delivery of that actor's queued commands
    pub arrivals: Option<broadcast::Receiver<String>>,
}

/// Command gateway service state
pub struct GatewayService {
    config: GatewayConfig,
    handler: Arc<GatewayHandler>,
    bridge: Arc<CommandBridge>,
    rate_limit: Arc<RateLimitState>,
    replay: Arc<ReplayGuard>,
    queue: Arc<dyn OfflineQueue>,
    arrivals: Option<broadcast::Receiver<String>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    background: Vec<JoinHandle<()>>,
    bound_addr: Option<SocketAddr>,
}

impl GatewayService {
    /// Create a new gateway service
    pub fn new(config: GatewayConfig, deps: GatewayDependencies) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        if let Some(gap) = config.security.replay_exposure() {
            warn!(
                replay_window = ?config.security.replay_window,
                timestamp_tolerance = ?config.security.timestamp_tolerance,
                exposure = ?gap,
                "Replay window is shorter than twice the timestamp tolerance"
            );
        }

        let rate_limit = Arc::new(RateLimitState::new(&config.rate_limit));
        let replay = Arc::new(ReplayGuard::new(&config.security));

        let bridge = Arc::new(CommandBridge::new(
            config.execution.clone(),
            deps.host,
            deps.capture,
            Arc::clone(&deps.queue),
            Arc::clone(&deps.directory),
        ));

        let handler = Arc::new(GatewayHandler::new(
            &config,
            Arc::clone(&rate_limit),
            Arc::clone(&replay),
            deps.directory,
            Arc::clone(&bridge),
            deps.clock,
        ));

        Ok(Self {
            config,
            handler,
            bridge,
            rate_limit,
            replay,
            queue: deps.queue,
            arrivals: deps.arrivals,
            shutdown_tx: None,
            server: None,
            background: Vec::new(),
            bound_addr: None,
        })
    }

    /// Router with a single catch-all entry point, so wrong methods and
    /// paths still get JSON bodies from the handler.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(entry)
            .with_state(Arc::clone(&self.handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(ClientIpLayer::new(self.config.http.trusted_proxies.clone())),
            )
    }

    /// Bind, start serving and start the background tasks. Returns the bound
    /// address.
    pub async fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        if self.server.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }
        info!("Starting command gateway...");

        let addr = self.config.http_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::Bind(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        }));
        self.shutdown_tx = Some(shutdown_tx);
        self.bound_addr = Some(local);

        self.start_background_tasks();
        info!(addr = %local, "Command gateway listening");
        Ok(local)
    }

    /// Stop serving, stop background tasks and clear the nonce and rate
    /// tables.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(server) = self.server.take() {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "HTTP server stopped with error"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
        }

        for task in self.background.drain(..) {
            task.abort();
        }

        self.replay.clear();
        self.rate_limit.clear();
        self.bound_addr = None;
        info!("Command gateway stopped");
    }

    /// Address the listener is bound to, once started
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    pub fn handler(&self) -> Arc<GatewayHandler> {
        Arc::clone(&self.handler)
    }

    pub fn bridge(&self) -> Arc<CommandBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn replay_guard(&self) -> Arc<ReplayGuard> {
        Arc::clone(&self.replay)
    }

    pub fn rate_limit_state(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.rate_limit)
    }

    /// Start background cleanup tasks
    fn start_background_tasks(&mut self) {
        let replay_guard = Arc::clone(&self.replay);
        let interval = self.config.security.sweep_interval;
        self.background.push(tokio::spawn(async move {
            replay::cleanup_task(replay_guard, interval).await;
        }));

        let rate_state = Arc::clone(&self.rate_limit);
        let interval = self.config.rate_limit.sweep_interval;
        self.background.push(tokio::spawn(async move {
            rate_limit::cleanup_task(rate_state, interval).await;
        }));

        let queue_store = Arc::clone(&self.queue);
        let interval = self.config.storage.queue_sweep_interval;
        self.background.push(tokio::spawn(async move {
            queue::cleanup_task(queue_store, interval).await;
        }));

        if let Some(arrivals) = self.arrivals.take() {
            let bridge = Arc::clone(&self.bridge);
            self.background
                .push(tokio::spawn(deliver_on_arrival(arrivals, bridge)));
        }
    }
}

/// Single entry point for every method and path
async fn entry(State(handler): State<Arc<GatewayHandler>>, request: Request<Body>) -> Response {
    handler.handle(request).await
}

async fn deliver_on_arrival(mut arrivals: broadcast::Receiver<String>, bridge: Arc<CommandBridge>) {
    loop {
        match arrivals.recv().await {
            Ok(actor) => {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    match bridge.deliver_queued(&actor).await {
                        Ok(0) => debug!(actor = %actor, "Nothing queued"),
                        Ok(count) => info!(actor = %actor, count, "Queued commands handed to actor"),
                        Err(e) => warn!(actor = %actor, error = %e, "Queued delivery failed"),
                    }
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Arrival notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
