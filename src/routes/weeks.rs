use axum::{
    extract::Query,
    routing::get,
    Json, Router,
};

use crate::{
    error::{AppError, AppResult},
    schemas::WeekQuery,
    services::week::{resolve_week_from_query, today_ist, WeekDescriptor},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/weeks/resolve", get(resolve_week))
}

async fn resolve_week(Query(query): Query<WeekQuery>) -> AppResult<Json<WeekDescriptor>> {
    resolve_week_from_query(query.week.as_deref(), today_ist())
        .map(Json)
        .ok_or_else(|| AppError::BadRequest("Invalid week. Use YYYY-Www or YYYY-MM-DD.".to_string()))
}
