use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::statistics::{DashboardOverview, OrderStatusCounts, Summary},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::statistics_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/summary", get(summary))
        .route("/order-status", get(order_status_counts))
        .route("/overview", get(dashboard_overview))
}

#[utoipa::path(
    get,
    path = "/api/statistics/summary",
    responses(
        (status = 200, description = "Revenue and completed-order totals", body = ApiResponse<Summary>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Statistics"
)]
pub async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<Summary>>> {
    let resp = statistics_service::summary(&state.pool, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/statistics/order-status",
    responses(
        (status = 200, description = "Order counts per status", body = ApiResponse<OrderStatusCounts>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Statistics"
)]
pub async fn order_status_counts(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderStatusCounts>>> {
    let resp = statistics_service::order_status_counts(&state.pool, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/statistics/overview",
    responses(
        (status = 200, description = "30-day dashboard with growth versus the prior window", body = ApiResponse<DashboardOverview>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Statistics"
)]
pub async fn dashboard_overview(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<DashboardOverview>>> {
    let resp = statistics_service::dashboard_overview(&state.pool, &user).await?;
    Ok(Json(resp))
}
