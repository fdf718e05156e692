use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem};

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemInput>,
    pub shipping_address: String,
    pub note: Option<String>,
    #[serde(default)]
    pub shipping_cost: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub order_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderFeedbackRequest {
    pub feedback: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackEntry {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub feedback: String,
    pub total_amount: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackList {
    pub items: Vec<FeedbackEntry>,
}
