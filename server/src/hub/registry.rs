//! Connection registry: who is online, in what role, member of which rooms.
//!
//! Two indexes are kept in step: connection id -> entry (sender, identity,
//! joined rooms) and room name -> member set. All membership mutations go
//! through this type so the two never drift; room membership dies with the
//! owning connection, never independently.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::hub::{ConnectionId, ConnectionSender};
use crate::protocol::{Role, ServerEvent};

/// The coarse room every admin connection joins alongside its identity room.
pub const ADMIN_ROOM: &str = "admin";

/// Room name for live tracking of a single ride.
pub fn ride_room(ride_id: &str) -> String {
    format!("ride_{ride_id}")
}

/// Identity room for a driver, the target of ride assignments.
pub fn driver_room(driver_id: &str) -> String {
    format!("driver_{driver_id}")
}

/// The identity a connection presented via `join_room`. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    /// The derived identity room, `"{role}_{user_id}"`.
    pub fn room(&self) -> String {
        format!("{}_{}", self.role.as_str(), self.user_id)
    }

    /// All rooms this identity subscribes to automatically.
    fn auto_rooms(&self) -> Vec<String> {
        let mut rooms = vec![self.room()];
        if self.role == Role::Admin {
            rooms.push(ADMIN_ROOM.to_string());
        }
        rooms
    }
}

struct ConnectionEntry {
    tx: ConnectionSender,
    identity: Option<Identity>,
    rooms: HashSet<String>,
}

/// In-memory registry of live connections and room memberships.
///
/// Constructor-injected into the event handlers (never a module-level
/// singleton) so tests can run isolated hub instances side by side.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly upgraded socket. No identity, no rooms yet.
    pub fn register(&self, conn_id: &str, tx: ConnectionSender) {
        self.connections.insert(
            conn_id.to_string(),
            ConnectionEntry {
                tx,
                identity: None,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(conn_id = %conn_id, connections = self.connections.len(), "connection registered");
    }

    /// Remove a connection and every membership it holds. Returns the bound
    /// identity, if any, so disconnect handling can react to the role.
    pub fn unregister(&self, conn_id: &str) -> Option<Identity> {
        let (_, entry) = self.connections.remove(conn_id)?;
        for room in &entry.rooms {
            self.remove_member(room, conn_id);
        }
        tracing::debug!(conn_id = %conn_id, "connection unregistered");
        entry.identity
    }

    /// Bind (or rebind) the identity for a connection and subscribe it to
    /// the derived rooms. Idempotent: rejoining with the same identity
    /// changes nothing; rejoining with a different one leaves the stale
    /// identity rooms first so role changes never leak memberships.
    pub fn bind_identity(&self, conn_id: &str, identity: Identity) {
        let mut joined = Vec::new();
        let mut left = Vec::new();
        {
            let Some(mut entry) = self.connections.get_mut(conn_id) else {
                return;
            };
            let new_rooms: HashSet<String> = identity.auto_rooms().into_iter().collect();
            if let Some(old) = entry.identity.replace(identity) {
                for room in old.auto_rooms() {
                    if !new_rooms.contains(&room) && entry.rooms.remove(&room) {
                        left.push(room);
                    }
                }
            }
            for room in new_rooms {
                if entry.rooms.insert(room.clone()) {
                    joined.push(room);
                }
            }
        }
        for room in left {
            self.remove_member(&room, conn_id);
        }
        for room in joined {
            self.add_member(&room, conn_id);
        }
    }

    /// Subscribe a connection to an arbitrary room (ride tracking). Does not
    /// require a bound identity.
    pub fn join_room(&self, conn_id: &str, room: &str) {
        let newly_joined = {
            let Some(mut entry) = self.connections.get_mut(conn_id) else {
                return;
            };
            entry.rooms.insert(room.to_string())
        };
        if newly_joined {
            self.add_member(room, conn_id);
        }
    }

    pub fn identity(&self, conn_id: &str) -> Option<Identity> {
        self.connections
            .get(conn_id)
            .and_then(|entry| entry.identity.clone())
    }

    /// Send one event to one connection. Returns false if the connection is
    /// gone or its writer has shut down; the caller treats that as loss, not
    /// an error, per the fire-and-forget contract.
    pub fn send_to(&self, conn_id: &str, event: &ServerEvent) -> bool {
        let Ok(text) = serde_json::to_string(event) else {
            return false;
        };
        match self.connections.get(conn_id) {
            Some(entry) => entry
                .tx
                .send(axum::extract::ws::Message::Text(text.into()))
                .is_ok(),
            None => false,
        }
    }

    /// Fan an event out to every member of a room. The payload is serialized
    /// once; delivery failures are ignored (closed senders are cleaned up
    /// when their connection unregisters).
    pub fn broadcast(&self, room: &str, event: &ServerEvent) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return,
        };
        let msg = axum::extract::ws::Message::Text(text.into());
        for conn_id in members {
            if let Some(entry) = self.connections.get(&conn_id) {
                let _ = entry.tx.send(msg.clone());
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    fn add_member(&self, room: &str, conn_id: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    fn remove_member(&self, room: &str, conn_id: &str) {
        let emptied = {
            let Some(mut members) = self.rooms.get_mut(room) else {
                return;
            };
            members.remove(conn_id);
            members.is_empty()
        };
        // Drop empty rooms so the index does not accumulate dead keys.
        if emptied {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Ack, ServerEvent};
    use tokio::sync::mpsc;

    fn attach(registry: &ConnectionRegistry, conn_id: &str) -> mpsc::UnboundedReceiver<axum::extract::ws::Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn_id, tx);
        rx
    }

    fn ack() -> ServerEvent {
        ServerEvent::HeartbeatAck(Ack { timestamp: 1 })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<axum::extract::ws::Message>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let registry = ConnectionRegistry::new();
        let mut in_room = attach(&registry, "c1");
        let mut outside = attach(&registry, "c2");

        registry.join_room("c1", "ride_R1");
        registry.broadcast("ride_R1", &ack());

        assert_eq!(drain(&mut in_room), 1);
        assert_eq!(drain(&mut outside), 0);
    }

    #[tokio::test]
    async fn rebinding_same_identity_does_not_duplicate_membership() {
        let registry = ConnectionRegistry::new();
        let mut rx = attach(&registry, "c1");

        let identity = Identity {
            user_id: "D1".into(),
            role: Role::Driver,
        };
        registry.bind_identity("c1", identity.clone());
        registry.bind_identity("c1", identity);

        registry.broadcast("driver_D1", &ack());
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test]
    async fn role_change_leaves_stale_identity_rooms() {
        let registry = ConnectionRegistry::new();
        let mut rx = attach(&registry, "c1");

        registry.bind_identity(
            "c1",
            Identity {
                user_id: "U1".into(),
                role: Role::Admin,
            },
        );
        registry.bind_identity(
            "c1",
            Identity {
                user_id: "U1".into(),
                role: Role::Employee,
            },
        );

        registry.broadcast(ADMIN_ROOM, &ack());
        registry.broadcast("admin_U1", &ack());
        assert_eq!(drain(&mut rx), 0, "stale admin memberships leaked");

        registry.broadcast("employee_U1", &ack());
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test]
    async fn unregister_cleans_room_index() {
        let registry = ConnectionRegistry::new();
        let _rx = attach(&registry, "c1");

        registry.join_room("c1", "ride_R1");
        assert_eq!(registry.room_size("ride_R1"), 1);

        let identity = registry.unregister("c1");
        assert!(identity.is_none());
        assert_eq!(registry.room_size("ride_R1"), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn unregister_returns_bound_identity() {
        let registry = ConnectionRegistry::new();
        let _rx = attach(&registry, "c1");

        registry.bind_identity(
            "c1",
            Identity {
                user_id: "D1".into(),
                role: Role::Driver,
            },
        );
        let identity = registry.unregister("c1").expect("identity bound");
        assert_eq!(identity.user_id, "D1");
        assert_eq!(identity.role, Role::Driver);
    }
}
