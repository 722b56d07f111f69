// Domain layer - pure types and calculations, no I/O
pub mod events;
pub mod geo;
pub mod session;
pub mod vehicle;
