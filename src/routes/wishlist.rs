use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};
use uuid::Uuid;

use crate::{
    dto::wishlist::{AddWishlistRequest, WishlistCheck, WishlistView},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::wishlist_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wishlist).post(add_to_wishlist))
        .route("/{product_id}", delete(remove_from_wishlist))
        .route("/{product_id}/check", get(check_wishlist))
}

#[utoipa::path(
    get,
    path = "/api/wishlist",
    responses(
        (status = 200, description = "Wishlist, inactive products filtered out", body = ApiResponse<WishlistView>)
    ),
    security(("bearer_auth" = [])),
    tag = "Wishlist"
)]
pub async fn get_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<WishlistView>>> {
    let resp = wishlist_service::get_wishlist(&state.pool, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/wishlist",
    request_body = AddWishlistRequest,
    responses(
        (status = 200, description = "Product added", body = ApiResponse<WishlistCheck>),
        (status = 400, description = "Inactive product or already in wishlist"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Wishlist"
)]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddWishlistRequest>,
) -> AppResult<Json<ApiResponse<WishlistCheck>>> {
    let resp = wishlist_service::add_to_wishlist(&state.pool, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/wishlist/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product removed"),
        (status = 404, description = "Not in wishlist"),
    ),
    security(("bearer_auth" = [])),
    tag = "Wishlist"
)]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = wishlist_service::remove_from_wishlist(&state.pool, &user, product_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/wishlist/{product_id}/check",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Membership flag", body = ApiResponse<WishlistCheck>)
    ),
    security(("bearer_auth" = [])),
    tag = "Wishlist"
)]
pub async fn check_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<WishlistCheck>>> {
    let resp = wishlist_service::check_wishlist(&state.pool, &user, product_id).await?;
    Ok(Json(resp))
}
