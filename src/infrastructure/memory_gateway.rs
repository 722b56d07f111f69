// In-process gateway for local runs and tests
use crate::application::persistence_gateway::PersistenceGateway;
use crate::domain::session::RentalBinding;
use crate::domain::vehicle::{TripLogRecord, VehicleRecord};
use crate::infrastructure::config::SeedData;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryGateway {
    vehicles: RwLock<Vec<VehicleRecord>>,
    rentals: RwLock<HashMap<i64, RentalBinding>>,
    trip_logs: RwLock<Vec<TripLogRecord>>,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
}

impl MemoryGateway {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let rentals = seed
            .rentals
            .iter()
            .map(|rental| (rental.user_id, rental.binding()))
            .collect();

        Self {
            vehicles: RwLock::new(seed.vehicles),
            rentals: RwLock::new(rentals),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub async fn upsert_vehicle(&self, record: VehicleRecord) {
        let mut vehicles = self.vehicles.write().await;
        match vehicles.iter_mut().find(|v| v.device_id == record.device_id) {
            Some(existing) => *existing = record,
            None => vehicles.push(record),
        }
    }

    #[cfg(test)]
    pub async fn remove_vehicle(&self, device_id: &str) {
        self.vehicles.write().await.retain(|v| v.device_id != device_id);
    }

    #[cfg(test)]
    pub async fn start_rental(&self, user_id: i64, binding: RentalBinding) {
        self.rentals.write().await.insert(user_id, binding);
    }

    #[cfg(test)]
    pub async fn trip_logs(&self) -> Vec<TripLogRecord> {
        self.trip_logs.read().await.clone()
    }

    #[cfg(test)]
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> anyhow::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("rental store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn list_vehicles(&self) -> anyhow::Result<Vec<VehicleRecord>> {
        self.check_reads()?;
        Ok(self.vehicles.read().await.clone())
    }

    async fn find_active_rental_for_user(&self, user_id: i64) -> anyhow::Result<Option<RentalBinding>> {
        self.check_reads()?;
        Ok(self.rentals.read().await.get(&user_id).cloned())
    }

    async fn append_trip_log(&self, record: TripLogRecord) -> anyhow::Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            anyhow::bail!("trip log store unreachable");
        }
        self.trip_logs.write().await.push(record);
        Ok(())
    }
}
