use chrono::{Duration, Utc};

use crate::{
    db::DbPool,
    dto::statistics::{DashboardOverview, OrderStatusCounts, StatusCount, Summary},
    error::AppResult,
    middleware::auth::{AuthUser, ensure_admin},
    response::ApiResponse,
};

/// Revenue figures always read the snapshotted order totals; live product
/// prices never feed these aggregates.
pub async fn summary(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<Summary>> {
    ensure_admin(user)?;

    let (total_orders, total_revenue): (i64, Option<i64>) = sqlx::query_as(
        "SELECT count(*), sum(total_amount) FROM orders WHERE status = 'done'",
    )
    .fetch_one(pool)
    .await?;

    let total_products: (i64,) = sqlx::query_as("SELECT count(*) FROM products")
        .fetch_one(pool)
        .await?;
    let total_users: (i64,) = sqlx::query_as("SELECT count(*) FROM users")
        .fetch_one(pool)
        .await?;

    Ok(ApiResponse::success(
        "OK",
        Summary {
            total_orders,
            total_revenue: total_revenue.unwrap_or(0),
            total_products: total_products.0,
            total_users: total_users.0,
        },
        None,
    ))
}

pub async fn order_status_counts(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderStatusCounts>> {
    ensure_admin(user)?;

    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, count(*) FROM orders GROUP BY status")
            .fetch_all(pool)
            .await?;

    let items = rows
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();

    Ok(ApiResponse::success("OK", OrderStatusCounts { items }, None))
}

pub async fn dashboard_overview(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<DashboardOverview>> {
    ensure_admin(user)?;

    let now = Utc::now();
    let thirty_days_ago = now - Duration::days(30);
    let sixty_days_ago = now - Duration::days(60);

    let current_revenue: (Option<i64>,) = sqlx::query_as(
        "SELECT sum(total_amount) FROM orders WHERE status = 'done' AND created_at >= $1",
    )
    .bind(thirty_days_ago)
    .fetch_one(pool)
    .await?;

    let previous_revenue: (Option<i64>,) = sqlx::query_as(
        r#"
        SELECT sum(total_amount) FROM orders
        WHERE status = 'done' AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(sixty_days_ago)
    .bind(thirty_days_ago)
    .fetch_one(pool)
    .await?;

    let current_orders: (i64,) =
        sqlx::query_as("SELECT count(*) FROM orders WHERE created_at >= $1")
            .bind(thirty_days_ago)
            .fetch_one(pool)
            .await?;
    let previous_orders: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM orders WHERE created_at >= $1 AND created_at < $2",
    )
    .bind(sixty_days_ago)
    .bind(thirty_days_ago)
    .fetch_one(pool)
    .await?;

    let total_products: (i64,) = sqlx::query_as("SELECT count(*) FROM products")
        .fetch_one(pool)
        .await?;
    let active_products: (i64,) =
        sqlx::query_as("SELECT count(*) FROM products WHERE status = 'active'")
            .fetch_one(pool)
            .await?;
    let total_users: (i64,) = sqlx::query_as("SELECT count(*) FROM users")
        .fetch_one(pool)
        .await?;
    let new_users: (i64,) = sqlx::query_as("SELECT count(*) FROM users WHERE created_at >= $1")
        .bind(thirty_days_ago)
        .fetch_one(pool)
        .await?;

    let revenue_last = current_revenue.0.unwrap_or(0);
    let revenue_previous = previous_revenue.0.unwrap_or(0);

    Ok(ApiResponse::success(
        "OK",
        DashboardOverview {
            revenue_last_30_days: revenue_last,
            revenue_previous_30_days: revenue_previous,
            revenue_growth_percent: growth_percent(revenue_last, revenue_previous),
            orders_last_30_days: current_orders.0,
            orders_previous_30_days: previous_orders.0,
            orders_growth_percent: growth_percent(current_orders.0, previous_orders.0),
            total_products: total_products.0,
            active_products: active_products.0,
            total_users: total_users.0,
            new_users_last_30_days: new_users.0,
        },
        None,
    ))
}

fn growth_percent(current: i64, previous: i64) -> f64 {
    if previous <= 0 {
        return 0.0;
    }
    ((current - previous) as f64 / previous as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_zero_without_a_baseline() {
        assert_eq!(growth_percent(500, 0), 0.0);
    }

    #[test]
    fn growth_handles_increase_and_decrease() {
        assert_eq!(growth_percent(150, 100), 50.0);
        assert_eq!(growth_percent(50, 100), -50.0);
    }
}
