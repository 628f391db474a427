//! # Interview Orchestrator - Main Application Entry Point
//!
//! Actix-web server hosting the real-time interview WebSocket at `/ws`
//! plus a small HTTP surface for health, metrics, and configuration.
//! One WebSocket connection drives one candidate interview end to end:
//! audio check, name check, the timed multilingual interview, and the
//! final assessment.

mod assessment;
mod audio;
mod collaborators;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod providers;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use collaborators::Collaborators;
use config::AppConfig;
use session::registry::SessionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Sessions whose connection vanished without teardown are swept after
/// this much inactivity.
const SESSION_IDLE_LIMIT: Duration = Duration::from_secs(30 * 60);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-orchestrator v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let registry = Arc::new(SessionRegistry::new(config.interview.max_concurrent_sessions));
    let collaborators = Collaborators::in_memory();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    spawn_session_sweeper(registry.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new({
        let app_state = app_state.clone();
        let registry = registry.clone();
        let collaborators = collaborators.clone();
        move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .app_data(web::Data::new(registry.clone()))
                .app_data(web::Data::new(collaborators.clone()))
                .wrap(cors)
                .wrap(middleware::MetricsMiddleware)
                .wrap(middleware::RequestLogging)
                .route("/ws", web::get().to(websocket::interview_websocket))
                .service(
                    web::scope("/api/v1")
                        .route("/health", web::get().to(health::health_check))
                        .route("/metrics", web::get().to(health::detailed_metrics))
                        .route("/config", web::get().to(handlers::get_config)),
                )
                // Root-level health check for load balancers.
                .route("/health", web::get().to(health::health_check))
        }
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_orchestrator=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodic sweep of sessions left behind by vanished connections.
fn spawn_session_sweeper(registry: Arc<SessionRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = registry.cleanup_expired(SESSION_IDLE_LIMIT);
            if removed > 0 {
                info!(removed, "Swept idle interview sessions");
            }
        }
    });
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
