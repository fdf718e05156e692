use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Effective price of a product: the discount price when nonzero, else the
/// base price.
pub fn effective_price(price: i64, discount_price: i64) -> i64 {
    if discount_price != 0 {
        discount_price
    } else {
        price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "in_progress" => Some(OrderStatus::InProgress),
            "done" => Some(OrderStatus::Done),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Done => "done",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled are terminal for status updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => matches!(
                next,
                OrderStatus::InProgress | OrderStatus::Done | OrderStatus::Cancelled
            ),
            OrderStatus::InProgress => {
                matches!(next, OrderStatus::Done | OrderStatus::Cancelled)
            }
            OrderStatus::Done | OrderStatus::Cancelled => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub is_admin: bool,
    pub avatar: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub vehicle_type: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub color: String,
    pub transmission: String,
    pub engine: String,
    pub stock: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub discount_price: i64,
    pub category_id: Uuid,
    pub images: Vec<String>,
    pub status: String,
    pub view_count: i32,
    pub sold_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_amount: i64,
    pub shipping_cost: i64,
    pub shipping_address: String,
    pub note: Option<String>,
    pub status: String,
    pub feedback: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_price_prefers_nonzero_discount() {
        assert_eq!(effective_price(20000, 0), 20000);
        assert_eq!(effective_price(20000, 18500), 18500);
    }

    #[test]
    fn pending_can_reach_every_other_status() {
        let pending = OrderStatus::Pending;
        assert!(pending.can_transition_to(OrderStatus::InProgress));
        assert!(pending.can_transition_to(OrderStatus::Done));
        assert!(pending.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn in_progress_cannot_return_to_pending() {
        let in_progress = OrderStatus::InProgress;
        assert!(!in_progress.can_transition_to(OrderStatus::Pending));
        assert!(in_progress.can_transition_to(OrderStatus::Done));
        assert!(in_progress.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn done_and_cancelled_are_terminal() {
        for status in [OrderStatus::Done, OrderStatus::Cancelled] {
            assert!(status.is_terminal());
            for next in [
                OrderStatus::Pending,
                OrderStatus::InProgress,
                OrderStatus::Done,
                OrderStatus::Cancelled,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn parse_round_trips_known_statuses() {
        for s in ["pending", "in_progress", "done", "cancelled"] {
            assert_eq!(OrderStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(OrderStatus::parse("shipped").is_none());
    }
}
