//! Transport client: one logical hub connection per consumer context.
//!
//! Connection state is an explicit machine {Disconnected, Connecting,
//! Connected}; the transitions carry the side effects (emit `join_room`,
//! re-join tracked rides) so reconnection behavior is deterministic instead
//! of flag soup. All emits are fire-and-forget: `Ok` from any send wrapper
//! means "dispatched to the transport", never "delivered" — there are no
//! delivery guarantees, and consumers reconcile through the snapshot
//! endpoint after gaps.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::{
    Ack, ChatRelay, ClientEvent, DriverDropped, EmergencyNotice, FleetSnapshot, GeoPoint,
    LocationBroadcast, LocationRecord, RideNotice, RideStatusChange, Role, ServerEvent,
};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection lifecycle states, surfaced passively via [`TransportClient::state`].
/// Transient network loss never raises an error to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected; call connect() first")]
    NotConnected,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

type Callbacks<T> = Mutex<Vec<Box<dyn Fn(T) + Send + Sync>>>;

/// Registered inbound-event listeners. Registration appends; earlier
/// callbacks are never displaced. Callers own de-duplication across their
/// component lifecycle, or call `remove_all_listeners` on teardown.
#[derive(Default)]
struct Handlers {
    location_update: Callbacks<LocationBroadcast>,
    driver_location_update: Callbacks<LocationRecord>,
    ride_assignment: Callbacks<RideNotice>,
    approval_request: Callbacks<RideNotice>,
    pm_approval: Callbacks<RideNotice>,
    ride_status_change: Callbacks<RideStatusChange>,
    emergency_alert: Callbacks<EmergencyNotice>,
    chat_message: Callbacks<ChatRelay>,
    driver_disconnected: Callbacks<DriverDropped>,
    bulk_update: Callbacks<FleetSnapshot>,
    heartbeat_ack: Callbacks<Ack>,
}

impl Handlers {
    fn fire<T: Clone>(list: &Callbacks<T>, payload: T) {
        for callback in list.lock().unwrap().iter() {
            callback(payload.clone());
        }
    }

    fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::LocationUpdated(p) => Self::fire(&self.location_update, p),
            ServerEvent::DriverLocationUpdated(p) => Self::fire(&self.driver_location_update, p),
            ServerEvent::RideAssignment(p) => Self::fire(&self.ride_assignment, p),
            ServerEvent::ApprovalRequestReceived(p) => Self::fire(&self.approval_request, p),
            ServerEvent::PmApprovalReceived(p) => Self::fire(&self.pm_approval, p),
            ServerEvent::RideStatusChanged(p) => Self::fire(&self.ride_status_change, p),
            ServerEvent::EmergencyAlertReceived(p) => Self::fire(&self.emergency_alert, p),
            ServerEvent::ChatMessageReceived(p) => Self::fire(&self.chat_message, p),
            ServerEvent::DriverDisconnected(p) => Self::fire(&self.driver_disconnected, p),
            ServerEvent::BulkLocationUpdated(p) => Self::fire(&self.bulk_update, p),
            ServerEvent::HeartbeatAck(p) => Self::fire(&self.heartbeat_ack, p),
        }
    }

    fn clear(&self) {
        self.location_update.lock().unwrap().clear();
        self.driver_location_update.lock().unwrap().clear();
        self.ride_assignment.lock().unwrap().clear();
        self.approval_request.lock().unwrap().clear();
        self.pm_approval.lock().unwrap().clear();
        self.ride_status_change.lock().unwrap().clear();
        self.emergency_alert.lock().unwrap().clear();
        self.chat_message.lock().unwrap().clear();
        self.driver_disconnected.lock().unwrap().clear();
        self.bulk_update.lock().unwrap().clear();
        self.heartbeat_ack.lock().unwrap().clear();
    }
}

struct Link {
    phase: ConnectionState,
    identity: Option<(String, Role)>,
    cmd_tx: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl Link {
    fn teardown(&mut self) {
        self.cmd_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.identity = None;
        self.phase = ConnectionState::Disconnected;
    }
}

/// One logical connection to the realtime hub.
pub struct TransportClient {
    endpoint: String,
    reconnect_delay: Duration,
    link: Arc<Mutex<Link>>,
    handlers: Arc<Handlers>,
    tracked_rides: Arc<Mutex<HashSet<String>>>,
}

impl TransportClient {
    /// `endpoint` is the hub's WebSocket URL, e.g. `ws://host:4015/ws`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_reconnect_delay(endpoint, DEFAULT_RECONNECT_DELAY)
    }

    pub fn with_reconnect_delay(endpoint: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_delay,
            link: Arc::new(Mutex::new(Link {
                phase: ConnectionState::Disconnected,
                identity: None,
                cmd_tx: None,
                task: None,
            })),
            handlers: Arc::new(Handlers::default()),
            tracked_rides: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open the connection and bind the given identity.
    ///
    /// Idempotent: connecting again as the same user keeps the existing
    /// connection. Connecting as a different user tears the old connection
    /// down first, so at most one underlying connection exists per client.
    pub fn connect(&self, user_id: &str, role: Role) {
        let mut link = self.link.lock().unwrap();

        if link.phase != ConnectionState::Disconnected {
            if link
                .identity
                .as_ref()
                .is_some_and(|(current, _)| current == user_id)
            {
                return;
            }
            link.teardown();
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        link.phase = ConnectionState::Connecting;
        link.identity = Some((user_id.to_string(), role));
        link.cmd_tx = Some(cmd_tx);
        link.task = Some(tokio::spawn(run_link(
            self.endpoint.clone(),
            user_id.to_string(),
            role,
            self.reconnect_delay,
            cmd_rx,
            self.link.clone(),
            self.handlers.clone(),
            self.tracked_rides.clone(),
        )));
    }

    /// Tear down the connection and clear the bound identity. Safe to call
    /// when already disconnected.
    pub fn disconnect(&self) {
        self.link.lock().unwrap().teardown();
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().unwrap().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    // --- Outbound wrappers. Ok = dispatched to the transport, nothing more. ---

    pub fn update_location(&self, record: LocationRecord) -> Result<(), TransportError> {
        self.emit(&ClientEvent::LocationUpdate(record))
    }

    /// Subscribe to a ride's tracking room. The subscription is remembered
    /// and re-established automatically after a reconnect.
    pub fn join_ride_tracking(&self, ride_id: &str) -> Result<(), TransportError> {
        self.tracked_rides
            .lock()
            .unwrap()
            .insert(ride_id.to_string());
        self.emit(&ClientEvent::JoinRideTracking(ride_id.to_string()))
    }

    pub fn send_ride_assignment(
        &self,
        driver_id: &str,
        ride_id: &str,
        message: &str,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::RideAssigned {
            driver_id: driver_id.to_string(),
            ride_id: ride_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn send_approval_request(
        &self,
        department_head_id: &str,
        ride_id: &str,
        message: &str,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::ApprovalRequest {
            department_head_id: department_head_id.to_string(),
            ride_id: ride_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn send_pm_approval_request(
        &self,
        project_manager_id: &str,
        ride_id: &str,
        message: &str,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::PmApprovalRequest {
            project_manager_id: project_manager_id.to_string(),
            ride_id: ride_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn send_ride_status_update(
        &self,
        ride_id: &str,
        status: &str,
        location: Option<GeoPoint>,
        message: Option<String>,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::RideStatusUpdate {
            ride_id: ride_id.to_string(),
            status: status.to_string(),
            location,
            message,
        })
    }

    pub fn send_emergency_alert(
        &self,
        driver_id: &str,
        location: GeoPoint,
        message: &str,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::EmergencyAlert {
            driver_id: driver_id.to_string(),
            location,
            message: message.to_string(),
        })
    }

    pub fn send_chat_message(
        &self,
        ride_id: &str,
        sender_id: &str,
        message: &str,
        sender_role: Role,
    ) -> Result<(), TransportError> {
        self.emit(&ClientEvent::ChatMessage {
            ride_id: ride_id.to_string(),
            sender_id: sender_id.to_string(),
            message: message.to_string(),
            sender_role,
        })
    }

    pub fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.emit(&ClientEvent::Heartbeat)
    }

    // --- Inbound listener registration. Appends, never replaces. ---

    pub fn on_location_update(&self, callback: impl Fn(LocationBroadcast) + Send + Sync + 'static) {
        self.handlers
            .location_update
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_driver_location_update(
        &self,
        callback: impl Fn(LocationRecord) + Send + Sync + 'static,
    ) {
        self.handlers
            .driver_location_update
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_ride_assignment(&self, callback: impl Fn(RideNotice) + Send + Sync + 'static) {
        self.handlers
            .ride_assignment
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_approval_request(&self, callback: impl Fn(RideNotice) + Send + Sync + 'static) {
        self.handlers
            .approval_request
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_pm_approval_request(&self, callback: impl Fn(RideNotice) + Send + Sync + 'static) {
        self.handlers
            .pm_approval
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_ride_status_change(
        &self,
        callback: impl Fn(RideStatusChange) + Send + Sync + 'static,
    ) {
        self.handlers
            .ride_status_change
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_emergency_alert(&self, callback: impl Fn(EmergencyNotice) + Send + Sync + 'static) {
        self.handlers
            .emergency_alert
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_chat_message(&self, callback: impl Fn(ChatRelay) + Send + Sync + 'static) {
        self.handlers
            .chat_message
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_driver_disconnected(&self, callback: impl Fn(DriverDropped) + Send + Sync + 'static) {
        self.handlers
            .driver_disconnected
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_bulk_location_update(&self, callback: impl Fn(FleetSnapshot) + Send + Sync + 'static) {
        self.handlers
            .bulk_update
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    pub fn on_heartbeat_ack(&self, callback: impl Fn(Ack) + Send + Sync + 'static) {
        self.handlers
            .heartbeat_ack
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Drop every registered listener, for component teardown.
    pub fn remove_all_listeners(&self) {
        self.handlers.clear();
    }

    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)?;
        let link = self.link.lock().unwrap();
        let cmd_tx = link.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        cmd_tx.send(text).map_err(|_| TransportError::NotConnected)
    }
}

fn set_phase(link: &Arc<Mutex<Link>>, phase: ConnectionState) {
    link.lock().unwrap().phase = phase;
}

/// The connection driver task: connect, run join side effects, pump frames
/// both ways, and on loss go back around after the reconnect delay. Frames
/// emitted during a gap sit in the command channel and flush after the next
/// successful connect; anything in flight when the socket died is lost, per
/// the fire-and-forget contract.
#[allow(clippy::too_many_arguments)]
async fn run_link(
    endpoint: String,
    user_id: String,
    role: Role,
    reconnect_delay: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    link: Arc<Mutex<Link>>,
    handlers: Arc<Handlers>,
    tracked_rides: Arc<Mutex<HashSet<String>>>,
) {
    loop {
        set_phase(&link, ConnectionState::Connecting);

        let ws = match connect_async(endpoint.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::warn!(error = %e, "hub connection failed, retrying");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };
        let (mut write, mut read) = ws.split();

        // Transition-triggered side effects: present identity, then restore
        // every ride-tracking subscription taken out before the gap.
        let mut rejoin = vec![ClientEvent::JoinRoom {
            user_id: user_id.clone(),
            role,
        }];
        rejoin.extend(
            tracked_rides
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .map(ClientEvent::JoinRideTracking),
        );

        let mut join_failed = false;
        for event in &rejoin {
            let Ok(text) = serde_json::to_string(event) else {
                continue;
            };
            if write.send(WsMessage::Text(text.into())).await.is_err() {
                join_failed = true;
                break;
            }
        }
        if join_failed {
            tokio::time::sleep(reconnect_delay).await;
            continue;
        }

        set_phase(&link, ConnectionState::Connected);
        tracing::info!(user_id = %user_id, "connected to hub");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(text) => {
                        if write.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Client side dropped the sender: orderly shutdown.
                        let _ = write.send(WsMessage::Close(None)).await;
                        set_phase(&link, ConnectionState::Disconnected);
                        return;
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => handlers.dispatch(event),
                            Err(e) => {
                                tracing::debug!(error = %e, "ignoring unrecognized frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "hub connection lost");
                        break;
                    }
                },
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}
