// Vehicle registry - authoritative live state, one lock per vehicle
use crate::domain::events::FleetSnapshot;
use crate::domain::vehicle::{
    NetworkStatus, PositionFix, RentalStatus, TelemetryUpdate, VehicleRecord, VehicleState,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(VehicleState),
    UnknownVehicle,
    NotRented(RentalStatus),
}

/// The outer map only changes on `load`; every per-vehicle read or write goes
/// through that vehicle's own mutex, so operations on one id are linearizable
/// and different ids never contend.
#[derive(Default)]
pub struct VehicleRegistry {
    vehicles: RwLock<HashMap<String, Arc<Mutex<VehicleState>>>>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the authoritative vehicle list into the registry. Known vehicles
    /// keep their live fields; vehicles missing from `records` are dropped.
    pub async fn load(&self, records: Vec<VehicleRecord>) -> usize {
        let mut vehicles = self.vehicles.write().await;
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            seen.insert(record.device_id.clone());
            match vehicles.get(&record.device_id) {
                Some(entry) => entry.lock().await.merge_record(record),
                None => {
                    let id = record.device_id.clone();
                    vehicles.insert(id, Arc::new(Mutex::new(VehicleState::from_record(record))));
                }
            }
        }

        vehicles.retain(|id, _| {
            let keep = seen.contains(id);
            if !keep {
                tracing::info!("Vehicle {} no longer in car records, dropping", id);
            }
            keep
        });

        vehicles.len()
    }

    async fn entry(&self, id: &str) -> Option<Arc<Mutex<VehicleState>>> {
        self.vehicles.read().await.get(id).cloned()
    }

    pub async fn get(&self, id: &str) -> Option<VehicleState> {
        let entry = self.entry(id).await?;
        let state = entry.lock().await.clone();
        Some(state)
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.vehicles.read().await.keys().cloned().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.vehicles.read().await.len()
    }

    /// Copy of every vehicle's state. Vehicles are read one at a time, so the
    /// snapshot is not a single point-in-time view across the fleet.
    pub async fn snapshot(&self) -> FleetSnapshot {
        let entries: Vec<Arc<Mutex<VehicleState>>> =
            self.vehicles.read().await.values().cloned().collect();

        let mut snapshot = FleetSnapshot::new();
        for entry in entries {
            let state = entry.lock().await.clone();
            snapshot.insert(state.id.clone(), state);
        }
        snapshot
    }

    /// Fold derived telemetry into the vehicle's state. Rejected without any
    /// change unless the vehicle exists and is currently rented.
    pub async fn apply_telemetry(
        &self,
        id: &str,
        fix: &PositionFix,
        update: &TelemetryUpdate,
    ) -> ApplyOutcome {
        let Some(entry) = self.entry(id).await else {
            return ApplyOutcome::UnknownVehicle;
        };

        let mut state = entry.lock().await;
        if !state.is_rented() {
            return ApplyOutcome::NotRented(state.status);
        }

        state.apply(fix, update);
        ApplyOutcome::Applied(state.clone())
    }

    pub async fn set_connectivity(
        &self,
        id: &str,
        status: NetworkStatus,
        descriptor: Option<String>,
    ) -> Option<VehicleState> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;
        state.network_status = status;
        state.connected_device = descriptor;
        Some(state.clone())
    }

    /// Clear position, speed and alert, and mark the vehicle offline.
    pub async fn reset_on_return(&self, id: &str) -> Option<VehicleState> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;
        state.reset_live_fields();
        Some(state.clone())
    }
}
