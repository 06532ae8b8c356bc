use axum::{routing::get, Router};

use crate::state::AppState;

pub mod exceptions;
pub mod health;
pub mod jsv_alerts;
pub mod reports;
pub mod weekly_reports;
pub mod weeks;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(weeks::router())
        .merge(weekly_reports::router())
        .merge(jsv_alerts::router())
        .merge(reports::router())
        .merge(exceptions::router())
}
