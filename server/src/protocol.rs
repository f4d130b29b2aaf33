//! Wire protocol for the realtime hub.
//!
//! Every frame is a JSON text message shaped `{"event": <name>, "data": <payload>}`.
//! Event names and payload field names are the compatibility surface shared
//! with the mobile and dashboard clients, so they are pinned here with serde
//! renames rather than derived from the Rust identifiers.
//!
//! Delivery is fire-and-forget in both directions: a decoded `ClientEvent`
//! may still be rejected by [`ClientEvent::validate`], in which case the hub
//! drops it locally. There is no response channel for validation failures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current time as Unix milliseconds, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Roles a connection can present at join time.
///
/// The hub trusts the presented role and user id without verifying them
/// against an authenticated session; see the limitation note on
/// [`ClientEvent::JoinRoom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Driver,
    ProjectManager,
    DepartmentHead,
    Employee,
}

impl Role {
    /// Wire spelling, also the prefix of the derived identity room.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
            Role::ProjectManager => "project_manager",
            Role::DepartmentHead => "department_head",
            Role::Employee => "employee",
        }
    }
}

/// A bare coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A driver position as submitted by the device (no timestamp; the hub
/// stamps records with its own receive time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_route_id: Option<String>,
}

impl LocationRecord {
    /// Attach a hub-side timestamp, producing the stored record shape.
    pub fn stamped(self, timestamp: i64) -> DriverLocation {
        DriverLocation {
            driver_id: self.driver_id,
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp,
            ride_id: self.ride_id,
            daily_route_id: self.daily_route_id,
        }
    }
}

/// The live per-driver record held by the hub and returned by the
/// `/api/locations` snapshot. Exactly one per driver id, last-write-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_route_id: Option<String>,
}

/// Reduced position payload broadcast to ride-tracking rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBroadcast {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

/// Shared shape of assignment and approval notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideNotice {
    pub ride_id: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusChange {
    pub ride_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyNotice {
    pub driver_id: String,
    pub location: GeoPoint,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRelay {
    pub ride_id: String,
    pub sender_id: String,
    pub message: String,
    pub sender_role: Role,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDropped {
    pub driver_id: String,
    pub timestamp: i64,
}

/// Aggregate emitted to the admin room after a bulk upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub locations: Vec<DriverLocation>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub timestamp: i64,
}

/// Client-to-server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind the connection to an identity and its derived room.
    ///
    /// Limitation carried from the source system: the presented user id and
    /// role are trusted as-is. Hardening would bind them to a server-verified
    /// session token at connect time.
    #[serde(rename = "join_room", rename_all = "camelCase")]
    JoinRoom { user_id: String, role: Role },

    #[serde(rename = "location_update")]
    LocationUpdate(LocationRecord),

    /// Payload is the ride id alone, not an object.
    #[serde(rename = "join_ride_tracking")]
    JoinRideTracking(String),

    #[serde(rename = "ride_assigned", rename_all = "camelCase")]
    RideAssigned {
        driver_id: String,
        ride_id: String,
        message: String,
    },

    #[serde(rename = "approval_request", rename_all = "camelCase")]
    ApprovalRequest {
        department_head_id: String,
        ride_id: String,
        message: String,
    },

    #[serde(rename = "pm_approval_request", rename_all = "camelCase")]
    PmApprovalRequest {
        project_manager_id: String,
        ride_id: String,
        message: String,
    },

    #[serde(rename = "ride_status_update", rename_all = "camelCase")]
    RideStatusUpdate {
        ride_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<GeoPoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "emergency_alert", rename_all = "camelCase")]
    EmergencyAlert {
        driver_id: String,
        location: GeoPoint,
        message: String,
    },

    #[serde(rename = "chat_message", rename_all = "camelCase")]
    ChatMessage {
        ride_id: String,
        sender_id: String,
        message: String,
        sender_role: Role,
    },

    #[serde(rename = "bulk_location_update", rename_all = "camelCase")]
    BulkLocationUpdate { locations: Vec<LocationRecord> },

    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "location_updated")]
    LocationUpdated(LocationBroadcast),

    #[serde(rename = "driver_location_updated")]
    DriverLocationUpdated(LocationRecord),

    #[serde(rename = "ride_assignment")]
    RideAssignment(RideNotice),

    #[serde(rename = "approval_request_received")]
    ApprovalRequestReceived(RideNotice),

    #[serde(rename = "pm_approval_received")]
    PmApprovalReceived(RideNotice),

    #[serde(rename = "ride_status_changed")]
    RideStatusChanged(RideStatusChange),

    #[serde(rename = "emergency_alert_received")]
    EmergencyAlertReceived(EmergencyNotice),

    #[serde(rename = "chat_message_received")]
    ChatMessageReceived(ChatRelay),

    #[serde(rename = "driver_disconnected")]
    DriverDisconnected(DriverDropped),

    #[serde(rename = "bulk_location_updated")]
    BulkLocationUpdated(FleetSnapshot),

    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck(Ack),
}

/// Why an inbound event was rejected at the boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("{0} out of range")]
    OutOfRange(&'static str),
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn check_coords(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::OutOfRange("latitude"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::OutOfRange("longitude"));
    }
    Ok(())
}

/// Validate a single position record (also applied per entry in bulk
/// updates, where invalid entries are skipped instead of rejecting the
/// whole batch).
pub fn validate_record(record: &LocationRecord) -> Result<(), ValidationError> {
    require("driverId", &record.driver_id)?;
    check_coords(record.latitude, record.longitude)
}

impl ClientEvent {
    /// Boundary validation applied before any handler runs. A failing event
    /// is dropped and logged by the hub; it never reaches routing state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ClientEvent::JoinRoom { user_id, .. } => require("userId", user_id),
            ClientEvent::LocationUpdate(record) => validate_record(record),
            ClientEvent::JoinRideTracking(ride_id) => require("rideId", ride_id),
            ClientEvent::RideAssigned {
                driver_id, ride_id, ..
            } => {
                require("driverId", driver_id)?;
                require("rideId", ride_id)
            }
            ClientEvent::ApprovalRequest {
                department_head_id,
                ride_id,
                ..
            } => {
                require("departmentHeadId", department_head_id)?;
                require("rideId", ride_id)
            }
            ClientEvent::PmApprovalRequest {
                project_manager_id,
                ride_id,
                ..
            } => {
                require("projectManagerId", project_manager_id)?;
                require("rideId", ride_id)
            }
            ClientEvent::RideStatusUpdate {
                ride_id,
                status,
                location,
                ..
            } => {
                require("rideId", ride_id)?;
                require("status", status)?;
                if let Some(point) = location {
                    check_coords(point.latitude, point.longitude)?;
                }
                Ok(())
            }
            ClientEvent::EmergencyAlert {
                driver_id, location, ..
            } => {
                require("driverId", driver_id)?;
                check_coords(location.latitude, location.longitude)
            }
            ClientEvent::ChatMessage {
                ride_id, sender_id, ..
            } => {
                require("rideId", ride_id)?;
                require("senderId", sender_id)
            }
            // Entries are validated individually during the bulk upsert.
            ClientEvent::BulkLocationUpdate { .. } => Ok(()),
            ClientEvent::Heartbeat => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_wire_shape() {
        let event = ClientEvent::JoinRoom {
            user_id: "U1".into(),
            role: Role::DepartmentHead,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "join_room", "data": {"userId": "U1", "role": "department_head"}})
        );
    }

    #[test]
    fn location_update_camel_case_fields() {
        let raw = json!({
            "event": "location_update",
            "data": {"driverId": "D1", "latitude": 6.93, "longitude": 79.86, "rideId": "R1"}
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::LocationUpdate(record) => {
                assert_eq!(record.driver_id, "D1");
                assert_eq!(record.ride_id.as_deref(), Some("R1"));
                assert_eq!(record.daily_route_id, None);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn join_ride_tracking_payload_is_bare_string() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "join_ride_tracking", "data": "R7"})).unwrap();
        assert_eq!(event, ClientEvent::JoinRideTracking("R7".into()));
    }

    #[test]
    fn heartbeat_has_no_payload() {
        let value = serde_json::to_value(&ClientEvent::Heartbeat).unwrap();
        assert_eq!(value, json!({"event": "heartbeat"}));
        let parsed: ClientEvent = serde_json::from_value(json!({"event": "heartbeat"})).unwrap();
        assert_eq!(parsed, ClientEvent::Heartbeat);
    }

    #[test]
    fn server_event_round_trips() {
        let event = ServerEvent::RideStatusChanged(RideStatusChange {
            ride_id: "R1".into(),
            status: "in_progress".into(),
            location: Some(GeoPoint {
                latitude: 6.93,
                longitude: 79.86,
            }),
            message: None,
            timestamp: 1_700_000_000_000,
        });
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"event\":\"ride_status_changed\""));
        assert!(text.contains("\"rideId\":\"R1\""));
        assert!(!text.contains("\"message\""));
        let back: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_event_fails_to_parse() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "drop_tables", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_latitude() {
        let event = ClientEvent::LocationUpdate(LocationRecord {
            driver_id: "D1".into(),
            latitude: 91.0,
            longitude: 79.86,
            ride_id: None,
            daily_route_id: None,
        });
        assert_eq!(
            event.validate(),
            Err(ValidationError::OutOfRange("latitude"))
        );
    }

    #[test]
    fn validation_rejects_blank_identifiers() {
        let event = ClientEvent::JoinRoom {
            user_id: "  ".into(),
            role: Role::Driver,
        };
        assert_eq!(
            event.validate(),
            Err(ValidationError::MissingField("userId"))
        );

        let event = ClientEvent::JoinRideTracking(String::new());
        assert_eq!(event.validate(), Err(ValidationError::MissingField("rideId")));
    }
}
