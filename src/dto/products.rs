use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Category, Product, ProductVariant};

#[derive(Debug, Deserialize, ToSchema)]
pub struct VariantInput {
    pub color: String,
    pub transmission: String,
    pub engine: String,
    pub stock: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    #[serde(default)]
    pub discount_price: i64,
    pub category_id: Uuid,
    pub images: Vec<String>,
    pub variants: Vec<VariantInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub discount_price: Option<i64>,
    pub category_id: Option<Uuid>,
    pub images: Option<Vec<String>>,
    /// When present, the stored variant list is reconciled against this one.
    /// Variants referenced by order items cannot be dropped.
    pub variants: Option<Vec<VariantInput>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustStockRequest {
    pub delta: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub category: Option<Category>,
    pub variants: Vec<ProductVariant>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductList {
    pub items: Vec<Product>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LowStockList {
    pub items: Vec<ProductVariant>,
}
