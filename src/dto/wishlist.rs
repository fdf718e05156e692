use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct AddWishlistRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WishlistView {
    pub items: Vec<Product>,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WishlistCheck {
    pub product_id: Uuid,
    pub in_wishlist: bool,
}
