// Telemetry pipeline - authorize, derive, apply, persist, emit
use crate::application::error::TrackerError;
use crate::application::persistence_gateway::PersistenceGateway;
use crate::application::vehicle_registry::{ApplyOutcome, VehicleRegistry};
use crate::domain::events::{AlertMetrics, AlertReason, CriticalAlert, OutboundEvent};
use crate::domain::geo::{self, AlertStatus, GeofenceBounds, SpeedEstimate};
use crate::domain::session::{GroupId, RentalBinding};
use crate::domain::vehicle::{PositionFix, TelemetryUpdate, TripLogRecord, VehicleState};
use crate::infrastructure::config::TelemetrySettings;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Destination for events produced by the pipeline. It also owns the live
/// rental bindings, which are re-checked once the vehicle lane is held.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit_to_group(&self, group: &GroupId, event: OutboundEvent);

    async fn is_bound(&self, binding: &RentalBinding) -> bool;
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: VehicleState,
    pub update: TelemetryUpdate,
    /// Events in the order they were handed to the sink
    pub emitted: Vec<(GroupId, OutboundEvent)>,
    /// Background trip-log append; dropping it detaches the write
    pub trip_log: JoinHandle<()>,
}

pub struct TelemetryPipeline {
    registry: Arc<VehicleRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    geofence: GeofenceBounds,
    settings: TelemetrySettings,
    // One lane per vehicle keeps derive/apply/emit for that vehicle in arrival order.
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TelemetryPipeline {
    pub fn new(
        registry: Arc<VehicleRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        geofence: GeofenceBounds,
        settings: TelemetrySettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            geofence,
            settings,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn process(
        &self,
        fix: PositionFix,
        binding: &RentalBinding,
        sink: &dyn EventSink,
    ) -> Result<PipelineOutcome, TrackerError> {
        if fix.vehicle_id != binding.vehicle_id {
            tracing::warn!(
                "Dropping fix for {}: session is bound to {}",
                fix.vehicle_id,
                binding.vehicle_id
            );
            return Err(TrackerError::UnauthorizedFix(format!(
                "session is not bound to {}",
                fix.vehicle_id
            )));
        }

        let lane = self.lane(&fix.vehicle_id).await;
        let _ordered = lane.lock().await;

        if !sink.is_bound(binding).await {
            tracing::warn!(
                "Dropping fix for {}: rental {} is no longer bound",
                fix.vehicle_id,
                binding.rental_id
            );
            return Err(TrackerError::UnauthorizedFix(format!(
                "rental {} is no longer active",
                binding.rental_id
            )));
        }

        let Some(current) = self.registry.get(&fix.vehicle_id).await else {
            tracing::warn!("Dropping fix for unknown vehicle {}", fix.vehicle_id);
            return Err(TrackerError::UnknownVehicle(fix.vehicle_id));
        };
        if !current.is_rented() {
            tracing::warn!(
                "Dropping fix for {}: vehicle status is {:?}",
                fix.vehicle_id,
                current.status
            );
            return Err(TrackerError::UnauthorizedFix(format!(
                "{} is not rented",
                fix.vehicle_id
            )));
        }

        let update = self.derive(&current, &fix);

        let state = match self.registry.apply_telemetry(&fix.vehicle_id, &fix, &update).await {
            ApplyOutcome::Applied(state) => state,
            ApplyOutcome::UnknownVehicle => {
                tracing::warn!("Vehicle {} disappeared before apply", fix.vehicle_id);
                return Err(TrackerError::UnknownVehicle(fix.vehicle_id));
            }
            ApplyOutcome::NotRented(status) => {
                tracing::warn!("Vehicle {} became {:?} before apply", fix.vehicle_id, status);
                return Err(TrackerError::UnauthorizedFix(format!(
                    "{} is not rented",
                    fix.vehicle_id
                )));
            }
        };

        tracing::debug!(
            "Vehicle {} at ({:.5}, {:.5}) speed {:.1} km/h alert {:?} overspeed {}",
            state.id,
            fix.point.lat,
            fix.point.lng,
            update.speed_kmh,
            update.alert,
            update.is_over_speed
        );

        let trip_log = self.persist(binding.rental_id, &fix, update.speed_kmh);

        let mut emitted = vec![
            (
                GroupId::Vehicle(state.id.clone()),
                OutboundEvent::VehicleUpdated(state.clone()),
            ),
            (
                GroupId::Admin,
                OutboundEvent::FleetUpdated(self.registry.snapshot().await),
            ),
        ];
        if update.is_critical() {
            emitted.push((GroupId::Admin, OutboundEvent::CriticalAlert(critical_alert(&fix, &update))));
        }

        for (group, event) in &emitted {
            sink.emit_to_group(group, event.clone()).await;
        }

        Ok(PipelineOutcome {
            state,
            update,
            emitted,
            trip_log,
        })
    }

    /// Derive speed, geofence and overspeed from the previous state. Fixes
    /// inside the elapsed floor keep the previous speed.
    pub fn derive(&self, previous: &VehicleState, fix: &PositionFix) -> TelemetryUpdate {
        let speed_kmh = match (previous.position, previous.last_update) {
            (Some(prev_point), Some(prev_at)) => {
                let elapsed_secs = (fix.recorded_at - prev_at).num_milliseconds() as f64 / 1000.0;
                match geo::estimate_speed(prev_point, fix.point, elapsed_secs, &self.settings.noise_floor()) {
                    SpeedEstimate::TooSoon => previous.speed,
                    estimate => estimate.kmh(),
                }
            }
            _ => 0.0,
        };

        TelemetryUpdate {
            speed_kmh,
            alert: geo::geofence_status(fix.point, &self.geofence),
            is_over_speed: geo::is_over_speed(speed_kmh, self.settings.overspeed_threshold_kmh),
        }
    }

    /// Clear a returned vehicle's live state. Waits for any fix already in
    /// the vehicle's lane.
    pub async fn reset_vehicle(&self, vehicle_id: &str) -> Option<VehicleState> {
        let lane = self.lane(vehicle_id).await;
        let _ordered = lane.lock().await;
        self.registry.reset_on_return(vehicle_id).await
    }

    /// Drop lanes of vehicles no longer in the registry.
    pub async fn prune_lanes(&self) -> usize {
        let known: HashSet<String> = self.registry.ids().await;
        let mut lanes = self.lanes.lock().await;
        let before = lanes.len();
        lanes.retain(|id, _| known.contains(id));
        before - lanes.len()
    }

    #[cfg(test)]
    pub(crate) async fn lane_count(&self) -> usize {
        self.lanes.lock().await.len()
    }

    async fn lane(&self, vehicle_id: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(vehicle_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn persist(&self, rental_id: i64, fix: &PositionFix, speed_kmh: f64) -> JoinHandle<()> {
        let gateway = self.gateway.clone();
        let timeout = self.settings.trip_log_timeout();
        let record = TripLogRecord {
            rental_id,
            lat: fix.point.lat,
            lng: fix.point.lng,
            speed: speed_kmh,
        };

        tokio::spawn(async move {
            let error = match tokio::time::timeout(timeout, gateway.append_trip_log(record)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => TrackerError::PersistenceUnavailable(format!("{:#}", e)),
                Err(_) => TrackerError::PersistenceUnavailable(format!("timed out after {:?}", timeout)),
            };
            tracing::warn!("Trip log append for rental {} failed: {}", rental_id, error);
        })
    }
}

fn critical_alert(fix: &PositionFix, update: &TelemetryUpdate) -> CriticalAlert {
    let mut reason = Vec::with_capacity(2);
    if update.alert == AlertStatus::OutOfBounds {
        reason.push(AlertReason::OutOfBounds);
    }
    if update.is_over_speed {
        reason.push(AlertReason::OverSpeed);
    }

    CriticalAlert {
        vehicle_id: fix.vehicle_id.clone(),
        reason,
        message: format!("{} violated fleet rules", fix.vehicle_id),
        metrics: AlertMetrics {
            lat: fix.point.lat,
            lng: fix.point.lng,
            speed: update.speed_kmh,
            alert: update.alert,
            is_over_speed: update.is_over_speed,
        },
    }
}
