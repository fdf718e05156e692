use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Summary {
    pub total_orders: i64,
    pub total_revenue: i64,
    pub total_products: i64,
    pub total_users: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatusCounts {
    pub items: Vec<StatusCount>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardOverview {
    pub revenue_last_30_days: i64,
    pub revenue_previous_30_days: i64,
    pub revenue_growth_percent: f64,
    pub orders_last_30_days: i64,
    pub orders_previous_30_days: i64,
    pub orders_growth_percent: f64,
    pub total_products: i64,
    pub active_products: i64,
    pub total_users: i64,
    pub new_users_last_30_days: i64,
}
