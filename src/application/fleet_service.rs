// Fleet service - registry refresh and rental completion use cases
use crate::application::error::TrackerError;
use crate::application::persistence_gateway::PersistenceGateway;
use crate::application::session_router::SessionRouter;
use crate::application::telemetry_pipeline::TelemetryPipeline;
use crate::application::vehicle_registry::VehicleRegistry;
use crate::domain::events::{FleetSnapshot, OutboundEvent};
use crate::domain::session::GroupId;
use crate::domain::vehicle::VehicleState;
use std::sync::Arc;

#[derive(Clone)]
pub struct FleetService {
    gateway: Arc<dyn PersistenceGateway>,
    registry: Arc<VehicleRegistry>,
    pipeline: Arc<TelemetryPipeline>,
    router: Arc<SessionRouter>,
}

impl FleetService {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<VehicleRegistry>,
        pipeline: Arc<TelemetryPipeline>,
        router: Arc<SessionRouter>,
    ) -> Self {
        Self {
            gateway,
            registry,
            pipeline,
            router,
        }
    }

    /// Reload car records. On failure the registry keeps its previous state.
    pub async fn refresh(&self) -> Result<usize, TrackerError> {
        let records = self.gateway.list_vehicles().await.map_err(|e| {
            tracing::error!("Vehicle registry refresh failed, keeping previous state: {:#}", e);
            TrackerError::RegistryLoadFailure(format!("{:#}", e))
        })?;

        let count = self.registry.load(records).await;
        tracing::info!("Vehicle registry loaded with {} vehicles", count);
        let pruned = self.pipeline.prune_lanes().await;
        if pruned > 0 {
            tracing::debug!("Pruned {} telemetry lanes for removed vehicles", pruned);
        }
        self.router.broadcast_fleet().await;
        Ok(count)
    }

    /// Detach a returned vehicle from its previous renter. Sessions are
    /// unbound before the reset so no later fix can restore the old position.
    pub async fn complete_rental(&self, vehicle_id: &str) -> Result<VehicleState, TrackerError> {
        let detached = self.router.unbind_vehicle(vehicle_id).await;
        let state = self
            .pipeline
            .reset_vehicle(vehicle_id)
            .await
            .ok_or_else(|| TrackerError::UnknownVehicle(vehicle_id.to_string()))?;

        tracing::info!(
            "Vehicle {} returned, live state cleared, {} sessions detached",
            vehicle_id,
            detached
        );
        self.router
            .emit_to_group(
                &GroupId::Vehicle(vehicle_id.to_string()),
                OutboundEvent::VehicleUpdated(state.clone()),
            )
            .await;
        self.router.broadcast_fleet().await;
        Ok(state)
    }

    pub async fn snapshot(&self) -> FleetSnapshot {
        self.registry.snapshot().await
    }
}
