// Vehicle domain model - live state tracked per fleet vehicle
use super::geo::{AlertStatus, GeoPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalStatus {
    #[serde(alias = "TERSEDIA")]
    Available,
    #[serde(alias = "DISEWA")]
    Rented,
    Pending,
    Maintenance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    #[default]
    Offline,
    Online,
    #[serde(rename = "Online-GPS")]
    OnlineGps,
}

/// Static car record as stored by the rental service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub device_id: String,
    pub name: String,
    pub plate_number: String,
    pub status: RentalStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub id: String,
    pub name: String,
    pub plate: String,
    pub status: RentalStatus,
    pub position: Option<GeoPoint>,
    pub speed: f64,
    pub alert: AlertStatus,
    pub is_over_speed: bool,
    pub network_status: NetworkStatus,
    pub connected_device: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl VehicleState {
    pub fn from_record(record: VehicleRecord) -> Self {
        Self {
            id: record.device_id,
            name: record.name,
            plate: record.plate_number,
            status: record.status,
            position: None,
            speed: 0.0,
            alert: AlertStatus::Safe,
            is_over_speed: false,
            network_status: NetworkStatus::Offline,
            connected_device: None,
            last_update: None,
        }
    }

    pub fn is_rented(&self) -> bool {
        self.status == RentalStatus::Rented
    }

    /// Overwrite static metadata, keeping live telemetry.
    pub fn merge_record(&mut self, record: VehicleRecord) {
        self.name = record.name;
        self.plate = record.plate_number;
        self.status = record.status;
    }

    pub fn apply(&mut self, fix: &PositionFix, update: &TelemetryUpdate) {
        self.position = Some(fix.point);
        self.speed = update.speed_kmh;
        self.alert = update.alert;
        self.is_over_speed = update.is_over_speed;
        self.last_update = Some(fix.recorded_at);
        if self.network_status != NetworkStatus::Offline {
            self.network_status = NetworkStatus::OnlineGps;
        }
    }

    pub fn reset_live_fields(&mut self) {
        self.position = None;
        self.speed = 0.0;
        self.alert = AlertStatus::Safe;
        self.is_over_speed = false;
        self.last_update = None;
        self.network_status = NetworkStatus::Offline;
        self.connected_device = None;
    }
}

/// A single reported sample, consumed once by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub vehicle_id: String,
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// Telemetry derived from a fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryUpdate {
    pub speed_kmh: f64,
    pub alert: AlertStatus,
    pub is_over_speed: bool,
}

impl TelemetryUpdate {
    pub fn is_critical(&self) -> bool {
        self.alert == AlertStatus::OutOfBounds || self.is_over_speed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripLogRecord {
    pub rental_id: i64,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
}
