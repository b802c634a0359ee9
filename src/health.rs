use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Write side of the process health flags. Both flags start out true.
#[derive(Debug, Clone)]
pub struct HealthState {
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

/// Read-only view of [`HealthState`] handed to the HTTP surface.
#[derive(Debug, Clone)]
pub struct HealthReader {
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        HealthState {
            alive: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn reader(&self) -> HealthReader {
        HealthReader {
            alive: self.alive.clone(),
            ready: self.ready.clone(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn mark_failed(&self) {
        self.ready.store(false, Ordering::Release);
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReader {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

pub fn router(health: HealthReader) -> Router {
    Router::new()
        .route("/is_alive", get(is_alive))
        .route("/is_ready", get(is_ready))
        .with_state(health)
}

async fn is_alive(State(health): State<HealthReader>) -> (StatusCode, &'static str) {
    if health.is_alive() {
        (StatusCode::OK, "I'm alive! :)")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "I'm dead x_x")
    }
}

async fn is_ready(State(health): State<HealthReader>) -> (StatusCode, &'static str) {
    if health.is_ready() {
        (StatusCode::OK, "I'm ready! :)")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Please wait! I'm not ready :(")
    }
}

/// Serves the health endpoints on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, health: HealthReader, shutdown: F) -> std::io::Result<()>
    where F: Future<Output=()> + Send + 'static
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health endpoints listening on {}", listener.local_addr()?);
    axum::serve(listener, router(health))
        .with_graceful_shutdown(shutdown)
        .await
}
