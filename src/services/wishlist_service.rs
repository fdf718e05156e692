use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    db::DbPool,
    dto::wishlist::{AddWishlistRequest, WishlistCheck, WishlistView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    response::{ApiResponse, Meta},
};

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    discount_price: i64,
    category_id: Uuid,
    images: serde_json::Value,
    status: String,
    view_count: i32,
    sold_count: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Populated wishlist read. Inactive products are filtered out at query time
/// without touching the stored rows.
pub async fn get_wishlist(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<WishlistView>> {
    let rows = sqlx::query_as::<_, ProductRow>(
        r#"
        SELECT p.id, p.name, p.description, p.price, p.discount_price,
               p.category_id, p.images, p.status, p.view_count, p.sold_count,
               p.created_at
        FROM wishlists w
        JOIN products p ON p.id = w.product_id
        WHERE w.user_id = $1 AND p.status = 'active'
        ORDER BY w.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .map(|r| Product {
            id: r.id,
            name: r.name,
            description: r.description,
            price: r.price,
            discount_price: r.discount_price,
            category_id: r.category_id,
            images: serde_json::from_value(r.images).unwrap_or_default(),
            status: r.status,
            view_count: r.view_count,
            sold_count: r.sold_count,
            created_at: r.created_at,
        })
        .collect();

    Ok(ApiResponse::success(
        "OK",
        WishlistView { items, total },
        None,
    ))
}

pub async fn add_to_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddWishlistRequest,
) -> AppResult<ApiResponse<WishlistCheck>> {
    let product: Option<(String,)> = sqlx::query_as("SELECT status FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(pool)
        .await?;
    let status = match product {
        Some((status,)) => status,
        None => return Err(AppError::NotFound),
    };
    if status != "active" {
        return Err(AppError::BadRequest(
            "Cannot add inactive product to wishlist".into(),
        ));
    }

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM wishlists WHERE user_id = $1 AND product_id = $2")
            .bind(user.user_id)
            .bind(payload.product_id)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Product already in wishlist".into()));
    }

    sqlx::query("INSERT INTO wishlists (id, user_id, product_id) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .bind(payload.product_id)
        .execute(pool)
        .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        AuditAction::WishlistAdd,
        Some(serde_json::json!({ "product_id": payload.product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product added to wishlist successfully",
        WishlistCheck {
            product_id: payload.product_id,
            in_wishlist: true,
        },
        Some(Meta::empty()),
    ))
}

pub async fn remove_from_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM wishlists WHERE user_id = $1 AND product_id = $2")
        .bind(user.user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        AuditAction::WishlistRemove,
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product removed from wishlist",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn check_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistCheck>> {
    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM wishlists WHERE user_id = $1 AND product_id = $2")
            .bind(user.user_id)
            .bind(product_id)
            .fetch_optional(pool)
            .await?;

    Ok(ApiResponse::success(
        "OK",
        WishlistCheck {
            product_id,
            in_wishlist: existing.is_some(),
        },
        None,
    ))
}
