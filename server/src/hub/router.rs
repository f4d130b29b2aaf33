//! Event routing: decode, validate, dispatch, emit.
//!
//! Every handler is emit-only — there is no response channel, so a
//! malformed or invalid event is dropped and logged here and nothing else
//! happens. One connection's bad input never touches another room's state.

use crate::hub::registry::{driver_room, ride_room, Identity, ADMIN_ROOM};
use crate::hub::ConnectionId;
use crate::protocol::{
    now_millis, validate_record, Ack, ChatRelay, ClientEvent, DriverDropped, EmergencyNotice,
    FleetSnapshot, GeoPoint, LocationBroadcast, LocationRecord, RideNotice, RideStatusChange, Role,
    ServerEvent,
};
use crate::state::AppState;

/// Handle one inbound text frame from a connection.
pub fn handle_text_message(text: &str, conn_id: &ConnectionId, state: &AppState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "dropping undecodable frame");
            return;
        }
    };

    if let Err(e) = event.validate() {
        tracing::warn!(conn_id = %conn_id, error = %e, "dropping invalid event");
        return;
    }

    dispatch(event, conn_id, state);
}

fn dispatch(event: ClientEvent, conn_id: &ConnectionId, state: &AppState) {
    match event {
        ClientEvent::JoinRoom { user_id, role } => handle_join_room(user_id, role, conn_id, state),
        ClientEvent::LocationUpdate(record) => handle_location_update(record, state),
        ClientEvent::JoinRideTracking(ride_id) => {
            state.registry.join_room(conn_id, &ride_room(&ride_id));
            tracing::debug!(conn_id = %conn_id, ride_id = %ride_id, "joined ride tracking");
        }
        ClientEvent::RideAssigned {
            driver_id,
            ride_id,
            message,
        } => {
            state.registry.broadcast(
                &driver_room(&driver_id),
                &ServerEvent::RideAssignment(RideNotice {
                    ride_id,
                    message,
                    timestamp: now_millis(),
                }),
            );
        }
        ClientEvent::ApprovalRequest {
            department_head_id,
            ride_id,
            message,
        } => {
            state.registry.broadcast(
                &format!("department_head_{department_head_id}"),
                &ServerEvent::ApprovalRequestReceived(RideNotice {
                    ride_id,
                    message,
                    timestamp: now_millis(),
                }),
            );
        }
        ClientEvent::PmApprovalRequest {
            project_manager_id,
            ride_id,
            message,
        } => {
            state.registry.broadcast(
                &format!("project_manager_{project_manager_id}"),
                &ServerEvent::PmApprovalReceived(RideNotice {
                    ride_id,
                    message,
                    timestamp: now_millis(),
                }),
            );
        }
        ClientEvent::RideStatusUpdate {
            ride_id,
            status,
            location,
            message,
        } => {
            state.registry.broadcast(
                &ride_room(&ride_id),
                &ServerEvent::RideStatusChanged(RideStatusChange {
                    ride_id,
                    status,
                    location,
                    message,
                    timestamp: now_millis(),
                }),
            );
        }
        ClientEvent::EmergencyAlert {
            driver_id,
            location,
            message,
        } => handle_emergency_alert(driver_id, location, message, state),
        ClientEvent::ChatMessage {
            ride_id,
            sender_id,
            message,
            sender_role,
        } => {
            // Relay only; chat history is the durable API's concern.
            state.registry.broadcast(
                &ride_room(&ride_id),
                &ServerEvent::ChatMessageReceived(ChatRelay {
                    ride_id,
                    sender_id,
                    message,
                    sender_role,
                    timestamp: now_millis(),
                }),
            );
        }
        ClientEvent::BulkLocationUpdate { locations } => {
            handle_bulk_location_update(locations, state)
        }
        ClientEvent::Heartbeat => {
            state.registry.send_to(
                conn_id,
                &ServerEvent::HeartbeatAck(Ack {
                    timestamp: now_millis(),
                }),
            );
        }
    }
}

/// Bind the presented identity and subscribe the connection to its derived
/// rooms. The user id and role are trusted as-is (see the limitation note
/// in the protocol module).
fn handle_join_room(user_id: String, role: Role, conn_id: &ConnectionId, state: &AppState) {
    tracing::info!(conn_id = %conn_id, user_id = %user_id, role = role.as_str(), "identity joined");
    state.registry.bind_identity(
        conn_id,
        Identity {
            user_id,
            role,
        },
    );
}

/// Upsert the driver's live record, then fan out: a reduced payload to the
/// ride room (when the update is ride-tagged) and the full payload to the
/// admin room, always.
fn handle_location_update(record: LocationRecord, state: &AppState) {
    let timestamp = now_millis();
    state.locations.upsert(record.clone().stamped(timestamp));

    if let Some(ride_id) = &record.ride_id {
        state.registry.broadcast(
            &ride_room(ride_id),
            &ServerEvent::LocationUpdated(LocationBroadcast {
                driver_id: record.driver_id.clone(),
                latitude: record.latitude,
                longitude: record.longitude,
                timestamp,
            }),
        );
    }

    state
        .registry
        .broadcast(ADMIN_ROOM, &ServerEvent::DriverLocationUpdated(record));
}

/// Safety-critical path: no gating, no conditions, straight to admins.
fn handle_emergency_alert(driver_id: String, location: GeoPoint, message: String, state: &AppState) {
    tracing::warn!(driver_id = %driver_id, "emergency alert received");
    state.registry.broadcast(
        ADMIN_ROOM,
        &ServerEvent::EmergencyAlertReceived(EmergencyNotice {
            driver_id,
            location,
            message,
            timestamp: now_millis(),
        }),
    );
}

/// Upsert every valid record in one pass, then emit a single aggregate to
/// the admin room. Invalid entries are skipped individually so one bad
/// record cannot sink the batch.
fn handle_bulk_location_update(locations: Vec<LocationRecord>, state: &AppState) {
    let timestamp = now_millis();
    let total = locations.len();

    let accepted = state.locations.upsert_many(
        locations
            .into_iter()
            .filter(|record| match validate_record(record) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping invalid bulk location entry");
                    false
                }
            })
            .map(|record| record.stamped(timestamp)),
    );

    tracing::debug!(accepted, total, "bulk location update applied");

    state.registry.broadcast(
        ADMIN_ROOM,
        &ServerEvent::BulkLocationUpdated(FleetSnapshot {
            locations: state.locations.snapshot(),
            timestamp,
        }),
    );
}

/// Transport-level disconnect: drop the connection and its memberships; a
/// driver going away additionally tells the admin room and clears the live
/// location record (absence is the staleness signal for everyone else).
pub fn handle_disconnect(conn_id: &ConnectionId, state: &AppState) {
    let Some(identity) = state.registry.unregister(conn_id) else {
        return;
    };

    if identity.role == Role::Driver {
        state.locations.remove(&identity.user_id);
        state.registry.broadcast(
            ADMIN_ROOM,
            &ServerEvent::DriverDisconnected(DriverDropped {
                driver_id: identity.user_id.clone(),
                timestamp: now_millis(),
            }),
        );
        tracing::info!(driver_id = %identity.user_id, "driver disconnected, record cleared");
    }
}
