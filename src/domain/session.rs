// Session domain model - authenticated identities and broadcast groups
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "PEMINJAM", alias = "DRIVER")]
    Driver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
    pub bound_vehicle_id: Option<String>,
    pub display_name: String,
}

/// Active rental tying a driver to a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalBinding {
    pub rental_id: i64,
    pub vehicle_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupId {
    Admin,
    Vehicle(String),
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Admin => write!(f, "ADMIN_ROOM"),
            GroupId::Vehicle(id) => write!(f, "CAR_{}", id),
        }
    }
}
