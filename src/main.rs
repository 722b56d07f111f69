// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::fleet_service::FleetService;
use crate::application::persistence_gateway::PersistenceGateway;
use crate::application::session_router::SessionRouter;
use crate::application::telemetry_pipeline::TelemetryPipeline;
use crate::application::vehicle_registry::VehicleRegistry;
use crate::infrastructure::config::{load_app_config, AppConfig, PersistenceBackend};
use crate::infrastructure::http_gateway::HttpGateway;
use crate::infrastructure::jwt_verifier::JwtVerifier;
use crate::infrastructure::memory_gateway::MemoryGateway;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    fleet_snapshot, health_check, refresh_fleet, return_vehicle, ws_upgrade,
};

fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
    let settings = &config.persistence;
    match settings.backend {
        PersistenceBackend::Memory => {
            tracing::info!(
                "Using in-memory persistence with {} seeded vehicles",
                settings.seed.vehicles.len()
            );
            Ok(Arc::new(MemoryGateway::from_seed(settings.seed.clone())))
        }
        PersistenceBackend::Http => {
            let base_url = settings
                .base_url
                .clone()
                .context("persistence.base_url is required for the http backend")?;
            tracing::info!("Using rental service at {}", base_url);
            Ok(Arc::new(HttpGateway::new(
                base_url,
                settings.service_token.clone(),
                std::time::Duration::from_millis(settings.timeout_ms),
            )?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleet_telemetry=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = load_app_config().context("Failed to load config/tracker")?;

    // Collaborators (infrastructure layer)
    let gateway = build_gateway(&config)?;
    let verifier = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));

    // Core services (application layer)
    let registry = Arc::new(VehicleRegistry::new());
    let pipeline = Arc::new(TelemetryPipeline::new(
        registry.clone(),
        gateway.clone(),
        config.geofence,
        config.telemetry.clone(),
    ));
    let router = Arc::new(SessionRouter::new(
        verifier,
        gateway.clone(),
        registry.clone(),
        pipeline.clone(),
        config.telemetry.speed_log_interval(),
    ));
    let fleet_service = FleetService::new(gateway, registry, pipeline, router.clone());

    // A failed initial load leaves an empty registry; a later refresh can fill it.
    if let Err(e) = fleet_service.refresh().await {
        tracing::error!("Starting with an empty vehicle registry: {}", e);
    }

    let state = Arc::new(AppState {
        router,
        fleet_service,
    });

    // Build router (presentation layer)
    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/fleet", get(fleet_snapshot))
        .route("/internal/fleet/refresh", post(refresh_fleet))
        .route("/internal/vehicles/:id/return", post(return_vehicle))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid server.bind address {}", config.server.bind))?;
    tracing::info!("Starting fleet-telemetry service on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
