// Application state for HTTP handlers
use crate::application::fleet_service::FleetService;
use crate::application::session_router::SessionRouter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SessionRouter>,
    pub fleet_service: FleetService,
}
