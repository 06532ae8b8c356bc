use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::AppResult,
    schemas::{validate_input, JsvAlertQuery, SalesmanPath},
    services::jsv_alerts::{build_jsv_repeat_alerts_by_salesman, JsvRepeatAlert},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/jsv-alerts/{salesman_id}", get(jsv_alert_for_salesman))
}

/// Banner for one salesperson; someone with no reports gets the inactive
/// shape rather than a 404.
async fn jsv_alert_for_salesman(
    State(state): State<AppState>,
    Path(path): Path<SalesmanPath>,
    Query(query): Query<JsvAlertQuery>,
) -> AppResult<Json<JsvRepeatAlert>> {
    validate_input(&query)?;
    let threshold = query.threshold.unwrap_or(state.config.jsv_repeat_threshold);
    let reports = state.store.reports_for_salesman(&path.salesman_id).await;
    let alert = build_jsv_repeat_alerts_by_salesman(&reports, threshold)
        .remove(&path.salesman_id)
        .unwrap_or_else(JsvRepeatAlert::inactive);
    Ok(Json(alert))
}
