// Application layer - use cases and collaborator traits
pub mod credential_verifier;
pub mod error;
pub mod fleet_service;
pub mod persistence_gateway;
pub mod session_router;
pub mod telemetry_pipeline;
pub mod vehicle_registry;
