use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::hub::handler as ws_handler;
use crate::protocol::DriverLocation;
use crate::state::AppState;

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity presented in-band via join_room)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Pull-based surface: snapshot for cold start/reconnect reconciliation,
    // health for operators. Realtime data is a best-effort overlay on top of
    // these authoritative reads.
    let api_routes = Router::new().route("/api/locations", get(location_snapshot));
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/locations — current view of every live driver location record.
async fn location_snapshot(State(state): State<AppState>) -> Json<Vec<DriverLocation>> {
    Json(state.locations.snapshot())
}

/// GET /health — liveness plus active-connection and active-driver counts.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeConnections": state.registry.connection_count(),
        "activeDrivers": state.locations.driver_count(),
    }))
}
