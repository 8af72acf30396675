use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness plus readiness.
///
/// Ready means: SQLite answers, Redis answers, and (when the worker is
/// enabled) the loop refreshed its lease within two lock TTLs. The
/// metrics snapshot rides along for operators.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database_ok = state.campaigns.ping().is_ok();
    let redis_ok = state.lease.ping().await.is_ok();

    let worker_enabled = state.config.broadcast.enabled;
    let lease_window = Duration::from_secs(state.config.broadcast.lock_ttl_sec * 2);
    let worker_fresh = state.metrics.lease_fresh(lease_window);

    let ready = database_ok && redis_ok && (!worker_enabled || worker_fresh);

    let known_users = state.users.count().unwrap_or(0);

    Json(json!({
        "status": if ready { "ok" } else { "degraded" },
        "ready": ready,
        "database": database_ok,
        "redis": redis_ok,
        "worker": {
            "enabled": worker_enabled,
            "lease_fresh": worker_fresh,
        },
        "known_users": known_users,
        "broadcast": state.metrics.snapshot(),
    }))
}
