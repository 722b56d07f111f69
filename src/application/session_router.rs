// Session router - connection lifecycle, group membership and event relay
use crate::application::credential_verifier::CredentialVerifier;
use crate::application::error::TrackerError;
use crate::application::persistence_gateway::PersistenceGateway;
use crate::application::telemetry_pipeline::{EventSink, PipelineOutcome, TelemetryPipeline};
use crate::application::vehicle_registry::VehicleRegistry;
use crate::domain::events::{OutboundEvent, SpeedLog};
use crate::domain::geo::GeoPoint;
use crate::domain::session::{ConnectionId, GroupId, Identity, RentalBinding, Role};
use crate::domain::vehicle::{NetworkStatus, PositionFix};
use crate::infrastructure::user_agent::parse_user_agent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{AbortHandle, JoinHandle};

/// Transport details captured when the socket was opened
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub origin: Option<String>,
}

/// Handle returned to the transport for one live connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub group: Option<GroupId>,
    pub events: mpsc::UnboundedReceiver<OutboundEvent>,
}

struct Session {
    identity: Identity,
    group: Option<GroupId>,
    binding: Option<RentalBinding>,
    outbox: mpsc::UnboundedSender<OutboundEvent>,
    heartbeat: Option<JoinHandle<()>>,
    pending_writes: Vec<AbortHandle>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<ConnectionId, Session>,
    groups: HashMap<GroupId, HashSet<ConnectionId>>,
}

impl SessionTable {
    fn join(&mut self, id: ConnectionId, group: &GroupId) {
        self.groups.entry(group.clone()).or_default().insert(id);
    }

    fn leave(&mut self, id: ConnectionId, group: &GroupId) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

/// Lock order: the session table is never held while calling into the
/// registry or the pipeline.
pub struct SessionRouter {
    verifier: Arc<dyn CredentialVerifier>,
    gateway: Arc<dyn PersistenceGateway>,
    registry: Arc<VehicleRegistry>,
    pipeline: Arc<TelemetryPipeline>,
    table: RwLock<SessionTable>,
    next_id: AtomicU64,
    speed_log_interval: Duration,
}

impl SessionRouter {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<VehicleRegistry>,
        pipeline: Arc<TelemetryPipeline>,
        speed_log_interval: Duration,
    ) -> Self {
        Self {
            verifier,
            gateway,
            registry,
            pipeline,
            table: RwLock::new(SessionTable::default()),
            next_id: AtomicU64::new(1),
            speed_log_interval,
        }
    }

    /// Verify the credential presented at connect time.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, TrackerError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TrackerError::UnauthenticatedConnection("missing credential".to_string()))?;
        self.verifier.verify(token)
    }

    /// Register an authenticated connection and dispatch on its role.
    pub async fn connect(self: &Arc<Self>, identity: Identity, client: ClientInfo) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, events) = mpsc::unbounded_channel();

        tracing::info!(
            "Connection {} opened by user {} ({:?})",
            id,
            identity.user_id,
            identity.role
        );

        let (group, binding) = match identity.role {
            Role::Admin => (Some(GroupId::Admin), None),
            Role::Driver => match self.active_rental(&identity).await {
                Some(binding) => (Some(GroupId::Vehicle(binding.vehicle_id.clone())), Some(binding)),
                None => (None, None),
            },
        };

        let heartbeat = binding
            .as_ref()
            .map(|binding| self.spawn_speed_log(binding.vehicle_id.clone(), identity.display_name.clone()));

        {
            let mut table = self.table.write().await;
            if let Some(group) = &group {
                table.join(id, group);
            }
            table.sessions.insert(
                id,
                Session {
                    identity: identity.clone(),
                    group: group.clone(),
                    binding: binding.clone(),
                    outbox,
                    heartbeat,
                    pending_writes: Vec::new(),
                },
            );
        }

        match (&identity.role, &binding) {
            (Role::Admin, _) => {
                let snapshot = self.registry.snapshot().await;
                self.emit_to_connection(id, OutboundEvent::FleetUpdated(snapshot)).await;
            }
            (Role::Driver, Some(binding)) => {
                let descriptor = describe_client(&identity, &client);
                tracing::info!("Vehicle {} connected: {}", binding.vehicle_id, descriptor);
                if self
                    .registry
                    .set_connectivity(&binding.vehicle_id, NetworkStatus::Online, Some(descriptor))
                    .await
                    .is_none()
                {
                    tracing::warn!("Rental {} points at unknown vehicle {}", binding.rental_id, binding.vehicle_id);
                }
                self.broadcast_fleet().await;
            }
            (Role::Driver, None) => {
                tracing::info!("User {} has no active rental, connection is inert", identity.user_id);
            }
        }

        Connection {
            id,
            identity,
            group,
            events,
        }
    }

    async fn active_rental(&self, identity: &Identity) -> Option<RentalBinding> {
        match self.gateway.find_active_rental_for_user(identity.user_id).await {
            Ok(Some(binding)) => {
                if let Some(claimed) = &identity.bound_vehicle_id {
                    if claimed != &binding.vehicle_id {
                        tracing::warn!(
                            "User {} credential names {} but active rental is for {}",
                            identity.user_id,
                            claimed,
                            binding.vehicle_id
                        );
                    }
                }
                Some(binding)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Active rental lookup for user {} failed: {:#}", identity.user_id, e);
                None
            }
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub async fn disconnect(&self, id: ConnectionId) {
        let session = {
            let mut table = self.table.write().await;
            let Some(session) = table.sessions.remove(&id) else {
                return;
            };
            if let Some(group) = &session.group {
                table.leave(id, group);
            }
            session
        };

        if let Some(heartbeat) = &session.heartbeat {
            heartbeat.abort();
        }
        for write in &session.pending_writes {
            write.abort();
        }

        tracing::info!("Connection {} closed (user {})", id, session.identity.user_id);

        if let (Role::Driver, Some(binding)) = (session.identity.role, &session.binding) {
            self.registry
                .set_connectivity(&binding.vehicle_id, NetworkStatus::Offline, None)
                .await;
            self.broadcast_fleet().await;
        }
    }

    /// Feed a fix from a driver connection into the pipeline. The vehicle and
    /// rental come from the session, never from the payload.
    pub async fn submit_position_fix(
        &self,
        id: ConnectionId,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
    ) -> Result<PipelineOutcome, TrackerError> {
        if !point.is_valid() {
            tracing::warn!("Connection {} sent invalid coordinates {:?}", id, point);
            return Err(TrackerError::MalformedFix(format!(
                "invalid coordinates ({}, {})",
                point.lat, point.lng
            )));
        }

        let binding = {
            let table = self.table.read().await;
            table.sessions.get(&id).and_then(|s| s.binding.clone())
        };
        let Some(binding) = binding else {
            tracing::warn!("Connection {} is not bound to a rental, dropping fix", id);
            return Err(TrackerError::UnauthorizedFix(format!(
                "connection {} has no active rental",
                id
            )));
        };

        let fix = PositionFix {
            vehicle_id: binding.vehicle_id.clone(),
            point,
            recorded_at,
        };
        let outcome = self.pipeline.process(fix, &binding, self).await?;

        let mut table = self.table.write().await;
        if let Some(session) = table.sessions.get_mut(&id) {
            session.pending_writes.retain(|write| !write.is_finished());
            session.pending_writes.push(outcome.trip_log.abort_handle());
        }

        Ok(outcome)
    }

    /// Deliver to every member of a group.
    pub async fn emit_to_group(&self, group: &GroupId, event: OutboundEvent) {
        let table = self.table.read().await;
        let Some(members) = table.groups.get(group) else {
            return;
        };

        for member in members {
            if let Some(session) = table.sessions.get(member) {
                let _ = session.outbox.send(event.clone());
            }
        }
    }

    /// Returns false when the connection is gone.
    pub async fn emit_to_connection(&self, id: ConnectionId, event: OutboundEvent) -> bool {
        let table = self.table.read().await;
        match table.sessions.get(&id) {
            Some(session) => session.outbox.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn broadcast_fleet(&self) {
        let snapshot = self.registry.snapshot().await;
        self.emit_to_group(&GroupId::Admin, OutboundEvent::FleetUpdated(snapshot))
            .await;
    }

    /// Detach every session bound to a returned vehicle: the binding is
    /// cleared, the vehicle group is left and the heartbeat stops. The
    /// connections stay open but inert.
    pub async fn unbind_vehicle(&self, vehicle_id: &str) -> usize {
        let group = GroupId::Vehicle(vehicle_id.to_string());
        let mut table = self.table.write().await;
        let bound: Vec<ConnectionId> = table
            .sessions
            .iter()
            .filter(|(_, s)| s.binding.as_ref().is_some_and(|b| b.vehicle_id == vehicle_id))
            .map(|(id, _)| *id)
            .collect();

        for id in &bound {
            table.leave(*id, &group);
            if let Some(session) = table.sessions.get_mut(id) {
                session.binding = None;
                session.group = None;
                if let Some(heartbeat) = session.heartbeat.take() {
                    heartbeat.abort();
                }
                tracing::info!(
                    "Connection {} (user {}) detached from returned vehicle {}",
                    id,
                    session.identity.user_id,
                    vehicle_id
                );
            }
        }
        bound.len()
    }

    #[cfg(test)]
    pub async fn connection_count(&self) -> usize {
        self.table.read().await.sessions.len()
    }

    #[cfg(test)]
    pub async fn group_members(&self, group: &GroupId) -> usize {
        self.table
            .read()
            .await
            .groups
            .get(group)
            .map_or(0, HashSet::len)
    }

    fn spawn_speed_log(self: &Arc<Self>, vehicle_id: String, identity: String) -> JoinHandle<()> {
        let router: Weak<Self> = Arc::downgrade(self);
        let period = self.speed_log_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                let Some(state) = router.registry.get(&vehicle_id).await else {
                    continue;
                };
                let log = SpeedLog {
                    vehicle_id: vehicle_id.clone(),
                    identity: identity.clone(),
                    speed: state.speed,
                    timestamp: Utc::now(),
                };
                router
                    .emit_to_group(&GroupId::Admin, OutboundEvent::SpeedLog(log))
                    .await;
            }
        })
    }
}

#[async_trait]
impl EventSink for SessionRouter {
    async fn emit_to_group(&self, group: &GroupId, event: OutboundEvent) {
        SessionRouter::emit_to_group(self, group, event).await;
    }

    async fn is_bound(&self, binding: &RentalBinding) -> bool {
        self.table
            .read()
            .await
            .sessions
            .values()
            .any(|s| s.binding.as_ref() == Some(binding))
    }
}

fn describe_client(identity: &Identity, client: &ClientInfo) -> String {
    format!(
        "{} (#{}) on {} from {}",
        identity.display_name,
        identity.user_id,
        parse_user_agent(client.user_agent.as_deref()),
        client.origin.as_deref().unwrap_or("unknown origin")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::telemetry_pipeline::tests::jakarta;
    use crate::domain::vehicle::{RentalStatus, VehicleRecord};
    use crate::infrastructure::config::TelemetrySettings;
    use crate::infrastructure::memory_gateway::MemoryGateway;
    use chrono::TimeZone;

    struct StaticCredentials(HashMap<String, Identity>);

    impl CredentialVerifier for StaticCredentials {
        fn verify(&self, token: &str) -> Result<Identity, TrackerError> {
            self.0
                .get(token)
                .cloned()
                .ok_or_else(|| TrackerError::UnauthenticatedConnection("unknown token".into()))
        }
    }

    fn admin() -> Identity {
        Identity {
            user_id: 1,
            role: Role::Admin,
            bound_vehicle_id: None,
            display_name: "admin_rental".into(),
        }
    }

    fn driver(user_id: i64) -> Identity {
        Identity {
            user_id,
            role: Role::Driver,
            bound_vehicle_id: Some("MOBIL_A".into()),
            display_name: format!("peminjam_{:02}", user_id),
        }
    }

    fn phone() -> ClientInfo {
        ClientInfo {
            user_agent: Some("NodeJS Client Pro/1.0 (Android 14; Mobile)".into()),
            origin: Some("10.0.0.7".into()),
        }
    }

    async fn setup(speed_log_interval: Duration) -> (Arc<SessionRouter>, Arc<VehicleRegistry>, Arc<MemoryGateway>) {
        let registry = Arc::new(VehicleRegistry::new());
        registry
            .load(vec![
                VehicleRecord {
                    device_id: "MOBIL_A".into(),
                    name: "Toyota Avanza".into(),
                    plate_number: "B 1234 KYZ".into(),
                    status: RentalStatus::Rented,
                },
                VehicleRecord {
                    device_id: "MOBIL_B".into(),
                    name: "Honda Jazz".into(),
                    plate_number: "B 5678 ABC".into(),
                    status: RentalStatus::Available,
                },
            ])
            .await;

        let gateway = Arc::new(MemoryGateway::new());
        gateway
            .start_rental(
                2,
                RentalBinding {
                    rental_id: 1,
                    vehicle_id: "MOBIL_A".into(),
                },
            )
            .await;

        let pipeline = Arc::new(TelemetryPipeline::new(
            registry.clone(),
            gateway.clone(),
            jakarta(),
            TelemetrySettings::default(),
        ));
        let credentials = StaticCredentials(HashMap::from([
            ("admin-token".to_string(), admin()),
            ("driver-token".to_string(), driver(2)),
        ]));
        let router = Arc::new(SessionRouter::new(
            Arc::new(credentials),
            gateway.clone(),
            registry.clone(),
            pipeline,
            speed_log_interval,
        ));
        (router, registry, gateway)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[OutboundEvent]) -> Vec<&'static str> {
        events.iter().map(OutboundEvent::name).collect()
    }

    fn at(secs: f64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    #[tokio::test]
    async fn test_authenticate_rejects_missing_and_invalid() {
        let (router, _, _) = setup(Duration::from_secs(3)).await;

        assert!(matches!(
            router.authenticate(None),
            Err(TrackerError::UnauthenticatedConnection(_))
        ));
        assert!(router.authenticate(Some("  ")).is_err());
        assert!(router.authenticate(Some("forged")).is_err());
        assert_eq!(router.authenticate(Some("admin-token")).unwrap(), admin());
        assert_eq!(router.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_admin_receives_snapshot_on_connect() {
        let (router, _, _) = setup(Duration::from_secs(3)).await;

        let mut conn = router.connect(admin(), ClientInfo::default()).await;

        assert_eq!(conn.group, Some(GroupId::Admin));
        let events = drain(&mut conn.events);
        assert_eq!(names(&events), vec!["fleet-updated"]);
        match &events[0] {
            OutboundEvent::FleetUpdated(snapshot) => assert_eq!(snapshot.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_driver_connect_marks_vehicle_online_and_notifies_admins() {
        let (router, registry, _) = setup(Duration::from_secs(3)).await;
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        drain(&mut admin_conn.events);

        let driver_conn = router.connect(driver(2), phone()).await;

        assert_eq!(driver_conn.group, Some(GroupId::Vehicle("MOBIL_A".into())));
        let state = registry.get("MOBIL_A").await.unwrap();
        assert_eq!(state.network_status, NetworkStatus::Online);
        assert_eq!(
            state.connected_device.as_deref(),
            Some("peminjam_02 (#2) on Android (mobile) from 10.0.0.7")
        );
        assert_eq!(names(&drain(&mut admin_conn.events)), vec!["fleet-updated"]);
    }

    #[tokio::test]
    async fn test_driver_without_rental_is_inert() {
        let (router, registry, _) = setup(Duration::from_secs(3)).await;
        let before = registry.snapshot().await;

        let mut conn = router.connect(driver(5), phone()).await;

        assert_eq!(conn.group, None);
        assert_eq!(registry.snapshot().await, before);
        let result = router.submit_position_fix(conn.id, GeoPoint::new(-6.2, 106.8), at(0.0)).await;
        assert!(matches!(result, Err(TrackerError::UnauthorizedFix(_))));
        router.broadcast_fleet().await;
        assert!(drain(&mut conn.events).is_empty());
    }

    #[tokio::test]
    async fn test_fix_fans_out_to_driver_and_admins() {
        let (router, _, _) = setup(Duration::from_secs(3)).await;
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let mut driver_conn = router.connect(driver(2), phone()).await;
        drain(&mut admin_conn.events);

        router
            .submit_position_fix(driver_conn.id, GeoPoint::new(-6.20, 106.80), at(0.0))
            .await
            .unwrap();
        let outcome = router
            .submit_position_fix(driver_conn.id, GeoPoint::new(-6.2009, 106.80), at(2.0))
            .await
            .unwrap();

        assert!(outcome.update.is_over_speed);
        assert_eq!(outcome.state.network_status, NetworkStatus::OnlineGps);
        assert_eq!(
            names(&drain(&mut driver_conn.events)),
            vec!["vehicle-updated", "vehicle-updated"]
        );
        assert_eq!(
            names(&drain(&mut admin_conn.events)),
            vec!["fleet-updated", "fleet-updated", "critical-alert"]
        );
    }

    #[tokio::test]
    async fn test_invalid_coordinates_are_rejected() {
        let (router, registry, _) = setup(Duration::from_secs(3)).await;
        let conn = router.connect(driver(2), phone()).await;

        let result = router
            .submit_position_fix(conn.id, GeoPoint::new(f64::NAN, 106.8), at(0.0))
            .await;

        assert!(matches!(result, Err(TrackerError::MalformedFix(_))));
        assert_eq!(registry.get("MOBIL_A").await.unwrap().position, None);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_broadcasts() {
        let (router, _, gateway) = setup(Duration::from_secs(3)).await;
        gateway.set_fail_appends(true);
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let mut driver_conn = router.connect(driver(2), phone()).await;
        drain(&mut admin_conn.events);

        router
            .submit_position_fix(driver_conn.id, GeoPoint::new(-6.2, 106.8), at(0.0))
            .await
            .unwrap();

        assert_eq!(names(&drain(&mut driver_conn.events)), vec!["vehicle-updated"]);
        assert_eq!(names(&drain(&mut admin_conn.events)), vec!["fleet-updated"]);
    }

    #[tokio::test]
    async fn test_driver_disconnect_goes_offline_with_one_fleet_update() {
        let (router, registry, _) = setup(Duration::from_secs(3)).await;
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let driver_conn = router.connect(driver(2), phone()).await;
        drain(&mut admin_conn.events);

        router.disconnect(driver_conn.id).await;
        router.disconnect(driver_conn.id).await;

        let state = registry.get("MOBIL_A").await.unwrap();
        assert_eq!(state.network_status, NetworkStatus::Offline);
        assert_eq!(state.connected_device, None);
        assert_eq!(names(&drain(&mut admin_conn.events)), vec!["fleet-updated"]);
        assert_eq!(router.group_members(&GroupId::Vehicle("MOBIL_A".into())).await, 0);
        assert_eq!(router.connection_count().await, 1);

        let result = router
            .submit_position_fix(driver_conn.id, GeoPoint::new(-6.2, 106.8), at(5.0))
            .await;
        assert!(matches!(result, Err(TrackerError::UnauthorizedFix(_))));
    }

    #[tokio::test]
    async fn test_admin_disconnect_does_not_touch_registry() {
        let (router, registry, _) = setup(Duration::from_secs(3)).await;
        let admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let before = registry.snapshot().await;

        router.disconnect(admin_conn.id).await;

        assert_eq!(registry.snapshot().await, before);
        assert_eq!(router.group_members(&GroupId::Admin).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_log_heartbeat_stops_on_disconnect() {
        let (router, _, _) = setup(Duration::from_secs(3)).await;
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let driver_conn = router.connect(driver(2), phone()).await;
        drain(&mut admin_conn.events);

        tokio::time::sleep(Duration::from_millis(6500)).await;
        let logs = drain(&mut admin_conn.events);
        assert_eq!(names(&logs), vec!["speed-log", "speed-log"]);
        match &logs[0] {
            OutboundEvent::SpeedLog(log) => {
                assert_eq!(log.vehicle_id, "MOBIL_A");
                assert_eq!(log.identity, "peminjam_02");
            }
            other => panic!("unexpected event {:?}", other),
        }

        router.disconnect(driver_conn.id).await;
        drain(&mut admin_conn.events);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut admin_conn.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_vehicle_makes_session_inert() {
        let (router, _, _) = setup(Duration::from_secs(3)).await;
        let mut admin_conn = router.connect(admin(), ClientInfo::default()).await;
        let driver_conn = router.connect(driver(2), phone()).await;
        drain(&mut admin_conn.events);

        assert_eq!(router.unbind_vehicle("MOBIL_A").await, 1);
        assert_eq!(router.unbind_vehicle("MOBIL_A").await, 0);

        assert_eq!(router.group_members(&GroupId::Vehicle("MOBIL_A".into())).await, 0);
        assert_eq!(router.connection_count().await, 2);
        let result = router
            .submit_position_fix(driver_conn.id, GeoPoint::new(-6.2, 106.8), at(0.0))
            .await;
        assert!(matches!(result, Err(TrackerError::UnauthorizedFix(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut admin_conn.events).is_empty());
    }
}
