use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::hub::actor;
use crate::state::AppState;

/// GET /ws
/// WebSocket upgrade endpoint. There is no token check here: the hub trusts
/// the identity a connection presents in its later `join_room` event, which
/// is the documented limitation of this subsystem. On upgrade, spawns the
/// connection actor.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| actor::run_connection(socket, state))
}
