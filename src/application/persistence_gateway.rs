// Gateway trait for the rental service's persistent records
use crate::domain::session::RentalBinding;
use crate::domain::vehicle::{TripLogRecord, VehicleRecord};
use async_trait::async_trait;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// List every known fleet vehicle
    async fn list_vehicles(&self) -> anyhow::Result<Vec<VehicleRecord>>;

    /// Active rental for a user, if any
    async fn find_active_rental_for_user(&self, user_id: i64) -> anyhow::Result<Option<RentalBinding>>;

    /// Append one trip-log row. Rows are never updated or deleted.
    async fn append_trip_log(&self, record: TripLogRecord) -> anyhow::Result<()>;
}
