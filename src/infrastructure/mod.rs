// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_gateway;
pub mod jwt_verifier;
pub mod memory_gateway;
pub mod user_agent;
