// Outbound events pushed to connected clients
use super::geo::AlertStatus;
use super::vehicle::VehicleState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Registry snapshot keyed by vehicle id
pub type FleetSnapshot = BTreeMap<String, VehicleState>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    VehicleUpdated(VehicleState),
    FleetUpdated(FleetSnapshot),
    CriticalAlert(CriticalAlert),
    SpeedLog(SpeedLog),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::VehicleUpdated(_) => "vehicle-updated",
            OutboundEvent::FleetUpdated(_) => "fleet-updated",
            OutboundEvent::CriticalAlert(_) => "critical-alert",
            OutboundEvent::SpeedLog(_) => "speed-log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertReason {
    OutOfBounds,
    OverSpeed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetrics {
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub alert: AlertStatus,
    pub is_over_speed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalAlert {
    pub vehicle_id: String,
    pub reason: Vec<AlertReason>,
    pub message: String,
    pub metrics: AlertMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedLog {
    pub vehicle_id: String,
    pub identity: String,
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}
