use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Every mutation the API records. The variant fixes both the action name
/// and the resource it touches, so call sites cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    PasswordChange,
    PasswordReset,
    UserStatusToggle,
    ProductCreate,
    ProductUpdate,
    ProductDelete,
    StockAdjust,
    CategoryCreate,
    CategoryDelete,
    CartUpdate,
    CartRemove,
    CartClear,
    WishlistAdd,
    WishlistRemove,
    OrderCreate,
    OrderStatusUpdate,
    OrderCancel,
    OrderSoftDelete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::UserRegister => "user_register",
            AuditAction::UserLogin => "user_login",
            AuditAction::PasswordChange => "password_change",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::UserStatusToggle => "user_status_toggle",
            AuditAction::ProductCreate => "product_create",
            AuditAction::ProductUpdate => "product_update",
            AuditAction::ProductDelete => "product_delete",
            AuditAction::StockAdjust => "stock_adjust",
            AuditAction::CategoryCreate => "category_create",
            AuditAction::CategoryDelete => "category_delete",
            AuditAction::CartUpdate => "cart_update",
            AuditAction::CartRemove => "cart_remove",
            AuditAction::CartClear => "cart_clear",
            AuditAction::WishlistAdd => "wishlist_add",
            AuditAction::WishlistRemove => "wishlist_remove",
            AuditAction::OrderCreate => "order_create",
            AuditAction::OrderStatusUpdate => "order_status_update",
            AuditAction::OrderCancel => "order_cancel",
            AuditAction::OrderSoftDelete => "order_soft_delete",
        }
    }

    pub fn resource(self) -> &'static str {
        match self {
            AuditAction::UserRegister
            | AuditAction::UserLogin
            | AuditAction::PasswordChange
            | AuditAction::PasswordReset
            | AuditAction::UserStatusToggle => "users",
            AuditAction::ProductCreate
            | AuditAction::ProductUpdate
            | AuditAction::ProductDelete => "products",
            AuditAction::StockAdjust => "product_variants",
            AuditAction::CategoryCreate | AuditAction::CategoryDelete => "categories",
            AuditAction::CartUpdate | AuditAction::CartRemove | AuditAction::CartClear => {
                "cart_items"
            }
            AuditAction::WishlistAdd | AuditAction::WishlistRemove => "wishlists",
            AuditAction::OrderCreate
            | AuditAction::OrderStatusUpdate
            | AuditAction::OrderCancel
            | AuditAction::OrderSoftDelete => "orders",
        }
    }
}

pub async fn log_audit(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: AuditAction,
    metadata: Option<Value>,
) -> AppResult<()> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(action.as_str())
    .bind(action.resource())
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_and_resources_agree() {
        assert_eq!(AuditAction::OrderCreate.as_str(), "order_create");
        assert_eq!(AuditAction::OrderCreate.resource(), "orders");
        assert_eq!(AuditAction::StockAdjust.resource(), "product_variants");
        assert_eq!(AuditAction::CartClear.resource(), "cart_items");
        assert_eq!(AuditAction::PasswordReset.as_str(), "password_reset");
    }
}
