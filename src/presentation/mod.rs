// Presentation layer - HTTP and WebSocket surface
pub mod app_state;
pub mod error_response;
pub mod handlers;
pub mod ws_connection;
