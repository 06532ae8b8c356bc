use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::services::week::get_week_parts;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let counts = state.store.counts().await;
    let now = Utc::now();
    let current_week = get_week_parts(now);
    Json(json!({
        "status": "ok",
        "now": now.to_rfc3339(),
        "currentWeek": current_week.iso_week,
        "dataset": counts,
    }))
}
