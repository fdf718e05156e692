use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub variant_id: Uuid,
    pub color: String,
    pub transmission: String,
    pub engine: String,
    pub quantity: i32,
    /// Current effective price of the product, not a snapshot.
    pub unit_price: i64,
    pub subtotal: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItemDto>,
    pub total_amount: i64,
}
