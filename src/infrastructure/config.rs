use crate::domain::geo::{GeofenceBounds, NoiseFloor};
use crate::domain::session::RentalBinding;
use crate::domain::vehicle::VehicleRecord;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub geofence: GeofenceBounds,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetrySettings {
    pub overspeed_threshold_kmh: f64,
    pub min_elapsed_secs: f64,
    pub min_displacement_m: f64,
    pub speed_log_interval_secs: u64,
    pub trip_log_timeout_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            overspeed_threshold_kmh: 100.0,
            min_elapsed_secs: 1.0,
            min_displacement_m: 2.0,
            speed_log_interval_secs: 3,
            trip_log_timeout_ms: 2000,
        }
    }
}

impl TelemetrySettings {
    pub fn noise_floor(&self) -> NoiseFloor {
        NoiseFloor {
            min_elapsed_secs: self.min_elapsed_secs,
            min_displacement_m: self.min_displacement_m,
        }
    }

    pub fn speed_log_interval(&self) -> Duration {
        Duration::from_secs(self.speed_log_interval_secs.max(1))
    }

    pub fn trip_log_timeout(&self) -> Duration {
        Duration::from_millis(self.trip_log_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceSettings {
    pub backend: PersistenceBackend,
    pub base_url: Option<String>,
    pub service_token: Option<String>,
    pub timeout_ms: u64,
    pub seed: SeedData,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            base_url: None,
            service_token: None,
            timeout_ms: 5000,
            seed: SeedData::default(),
        }
    }
}

/// Records for the in-memory gateway
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SeedData {
    pub vehicles: Vec<VehicleRecord>,
    pub rentals: Vec<SeedRental>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedRental {
    pub user_id: i64,
    pub rental_id: i64,
    pub vehicle_id: String,
}

impl SeedRental {
    pub fn binding(&self) -> RentalBinding {
        RentalBinding {
            rental_id: self.rental_id,
            vehicle_id: self.vehicle_id.clone(),
        }
    }
}

/// Load `config/tracker.*`, overridden by `TRACKER__SECTION__KEY` variables.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/tracker"))
        .add_source(
            config::Environment::with_prefix("TRACKER")
                .prefix_separator("__")
                .separator("__"),
        );

    build_app_config(builder)
}

fn build_app_config(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<AppConfig> {
    let settings = builder.build()?;
    Ok(settings.try_deserialize()?)
}
