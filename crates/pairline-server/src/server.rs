use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use pairline_settings::ServerSettings;

use crate::controller::SessionController;
use crate::handlers;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::stream;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            keep_alive: Duration::from_secs(settings.keep_alive_secs.max(1)),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    /// Cancelled on shutdown; ends every open stream.
    pub shutdown: CancellationToken,
    pub keep_alive: Duration,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        controller: SessionController,
        shutdown: CancellationToken,
        keep_alive: Duration,
    ) -> Self {
        Self {
            controller,
            shutdown,
            keep_alive,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/auth/getqr/stream",
            get(stream::stream_handler).fallback(handlers::not_found),
        )
        .route(
            "/auth/getqr/new",
            get(handlers::restart_handler)
                .post(handlers::restart_handler)
                .fallback(handlers::not_found),
        )
        .route(
            "/auth/logout",
            get(handlers::logout_handler)
                .post(handlers::logout_handler)
                .fallback(handlers::not_found),
        )
        .route(
            "/auth/testsend",
            post(handlers::relay_handler).fallback(handlers::not_found),
        )
        .route(
            "/health",
            get(handlers::health_handler).fallback(handlers::not_found),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background.
pub async fn start(
    config: ServerConfig,
    controller: SessionController,
) -> Result<ServerHandle, std::io::Error> {
    let coordinator = ShutdownCoordinator::new(config.shutdown_timeout);
    let state = AppState::new(controller.clone(), coordinator.token(), config.keep_alive);
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "pairline server started");

    let token = coordinator.token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server terminated with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        coordinator,
        controller,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    coordinator: ShutdownCoordinator,
    controller: SessionController,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.coordinator.token()
    }

    /// End open streams, stop accepting connections, destroy the active
    /// session and wait for background work.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self.coordinator.run(self.server, &self.controller).await;
        tracing::info!(
            listener_stopped = report.listener_stopped,
            background_drained = report.background_drained,
            "pairline server stopped"
        );
        report
    }
}
