use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::effective_price,
    response::{ApiResponse, Meta},
};

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    price: i64,
    discount_price: i64,
    variant_id: Uuid,
    color: String,
    transmission: String,
    engine: String,
    quantity: i32,
}

async fn load_cart(pool: &DbPool, user_id: Uuid) -> AppResult<CartView> {
    let rows = sqlx::query_as::<_, CartRow>(
        r#"
        SELECT ci.id, ci.product_id, p.name, p.price, p.discount_price,
               ci.variant_id, v.color, v.transmission, v.engine, ci.quantity
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        JOIN product_variants v ON v.id = ci.variant_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut total_amount = 0_i64;
    let items = rows
        .into_iter()
        .map(|row| {
            let unit_price = effective_price(row.price, row.discount_price);
            let subtotal = unit_price * i64::from(row.quantity);
            total_amount += subtotal;
            CartItemDto {
                id: row.id,
                product_id: row.product_id,
                product_name: row.name,
                variant_id: row.variant_id,
                color: row.color,
                transmission: row.transmission,
                engine: row.engine,
                quantity: row.quantity,
                unit_price,
                subtotal,
            }
        })
        .collect();

    Ok(CartView {
        items,
        total_amount,
    })
}

pub async fn get_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let cart = load_cart(pool, user.user_id).await?;
    Ok(ApiResponse::success("OK", cart, None))
}

/// Adding a variant already in the cart overwrites that line's quantity.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }

    let product: Option<(String,)> =
        sqlx::query_as("SELECT status FROM products WHERE id = $1")
            .bind(payload.product_id)
            .fetch_optional(pool)
            .await?;
    let status = match product {
        Some((status,)) => status,
        None => return Err(AppError::BadRequest("Product not found".into())),
    };
    if status != "active" {
        return Err(AppError::BadRequest("Product is not available".into()));
    }

    let variant: Option<(i32,)> = sqlx::query_as(
        "SELECT stock FROM product_variants WHERE id = $1 AND product_id = $2",
    )
    .bind(payload.variant_id)
    .bind(payload.product_id)
    .fetch_optional(pool)
    .await?;
    let stock = match variant {
        Some((stock,)) => stock,
        None => return Err(AppError::BadRequest("Variant not found for this product".into())),
    };
    if stock < payload.quantity {
        return Err(AppError::BadRequest("Insufficient stock for this variant".into()));
    }

    sqlx::query(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, variant_id, quantity)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, variant_id)
        DO UPDATE SET quantity = EXCLUDED.quantity
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.variant_id)
    .bind(payload.quantity)
    .execute(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        AuditAction::CartUpdate,
        Some(serde_json::json!({
            "variant_id": payload.variant_id,
            "quantity": payload.quantity
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let cart = load_cart(pool, user.user_id).await?;
    Ok(ApiResponse::success("Item added to cart", cart, None))
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    variant_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE variant_id = $1 AND user_id = $2")
        .bind(variant_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        AuditAction::CartRemove,
        Some(serde_json::json!({ "variant_id": variant_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let cart = load_cart(pool, user.user_id).await?;
    Ok(ApiResponse::success("Removed item from cart", cart, None))
}

pub async fn clear_cart(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        AuditAction::CartClear,
        None,
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
