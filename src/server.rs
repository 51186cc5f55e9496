use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::{do_some_work, parse_json, parse_jsonapi, AppState, SharedState};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limiter::RateLimiter;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{oneshot, watch, Notify};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the router. Every route sits behind the rate limiter.
pub fn create_app(state: SharedState) -> Router {
    let limiter = state.rate_limiter.clone();

    Router::new()
        .route("/worker", get(do_some_work))
        .route("/json-parser", post(parse_json))
        .route("/jsonapi-parser", post(parse_jsonapi))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// [`ShutdownHandle::shutdown`]
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt"),
            ShutdownReason::Terminate => write!(f, "terminate"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

/// Stops a running server from outside its task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// Takes effect even if the server has not started serving yet.
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

pub struct Server {
    app: Router,
    bind_address: SocketAddr,
    shutdown_grace: Duration,
    state: Arc<watch::Sender<ServerState>>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let rate_limiter = RateLimiter::new(&config)?;
        Ok(Self::with_state(&config, Arc::new(AppState::new(rate_limiter))))
    }

    pub fn with_state(config: &Config, state: SharedState) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Stopped);

        Self {
            app: create_app(state),
            bind_address: config.bind_address,
            shutdown_grace: config.shutdown_grace(),
            state: Arc::new(state_tx),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: Arc::clone(&self.shutdown),
        }
    }

    /// Bind and serve until SIGINT, SIGTERM or a [`ShutdownHandle`] request.
    pub async fn start(self) -> Result<ShutdownReason> {
        self.bind().await?.run().await
    }

    pub async fn bind(self) -> Result<BoundServer> {
        self.state.send_replace(ServerState::Starting);

        let listener = match TcpListener::bind(self.bind_address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(Error::Startup {
                    addr: self.bind_address,
                    source,
                });
            }
        };

        tracing::info!(address = %self.bind_address, "Listening");

        Ok(BoundServer {
            listener,
            app: self.app,
            shutdown_grace: self.shutdown_grace,
            state: self.state,
            shutdown: self.shutdown,
        })
    }
}

/// A server holding its listening socket, not yet accepting connections.
pub struct BoundServer {
    listener: TcpListener,
    app: Router,
    shutdown_grace: Duration,
    state: Arc<watch::Sender<ServerState>>,
    shutdown: Arc<Notify>,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Serve)
    }

    pub async fn run(self) -> Result<ShutdownReason> {
        let notify = Arc::clone(&self.shutdown);
        self.run_until(shutdown_signal(notify)).await
    }

    /// Serve until `signal` resolves, then stop accepting and give in-flight
    /// requests up to the grace period before dropping them.
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownReason>
    where
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        let BoundServer {
            listener,
            app,
            shutdown_grace,
            state,
            ..
        } = self;

        let (reason_tx, mut reason_rx) = oneshot::channel();
        let graceful = async move {
            let _ = reason_tx.send(signal.await);
        };

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(graceful)
        .into_future();
        tokio::pin!(server);

        state.send_replace(ServerState::Running);
        tracing::info!("Server running");

        let (result, reason) = tokio::select! {
            result = &mut server => (result, reason_rx.try_recv().ok()),
            Ok(reason) = &mut reason_rx => {
                state.send_replace(ServerState::ShuttingDown);
                tracing::info!(
                    reason = %reason,
                    grace_ms = shutdown_grace.as_millis() as u64,
                    "Shutting down server"
                );

                let drained = match tokio::time::timeout(shutdown_grace, &mut server).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Shutdown grace period elapsed, dropping in-flight requests");
                        Ok(())
                    }
                };
                (drained, Some(reason))
            }
        };

        state.send_replace(ServerState::Stopped);
        result.map_err(Error::Serve)?;

        tracing::info!("Server stopped");
        Ok(reason.unwrap_or(ShutdownReason::Requested))
    }
}

async fn shutdown_signal(notify: Arc<Notify>) -> ShutdownReason {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            ShutdownReason::Interrupt
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            ShutdownReason::Terminate
        },
        _ = notify.notified() => {
            tracing::info!("Shutdown requested, initiating graceful shutdown");
            ShutdownReason::Requested
        },
    }
}
