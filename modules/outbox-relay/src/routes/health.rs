use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;

/// Reports database and broker reachability; 503 when either is down
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let (bus, bus_ok) = match &state.nats {
        Some(client) => {
            let connected =
                client.connection_state() == async_nats::connection::State::Connected;
            (if connected { "connected" } else { "disconnected" }, connected)
        }
        None => ("inmemory", true),
    };

    let dep_up = &state.metrics.dep_up;
    dep_up.with_label_values(&["db"]).set(i64::from(db_ok));
    dep_up.with_label_values(&["bus"]).set(i64::from(bus_ok));

    let healthy = db_ok && bus_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": "outbox-relay",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if db_ok { "connected" } else { "unreachable" },
            "bus": bus,
        })),
    )
}
