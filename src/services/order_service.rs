use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashSet;
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{
        CancelOrderRequest, CreateOrderRequest, FeedbackEntry, FeedbackList, OrderFeedbackRequest,
        OrderList, OrderWithItems, UpdateOrderStatusRequest,
    },
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        product_variants::{Column as VariantCol, Entity as ProductVariants},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem, OrderStatus, effective_price},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination, SortOrder},
    state::AppState,
};

/// Create an order from the user's cart. The full sequence — stock decrement,
/// order insert, cart cleanup — runs in one transaction; an insufficient-stock
/// failure on any line rolls everything back.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("Order must contain at least one item".into()));
    }
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::BadRequest("Shipping address is required".into()));
    }
    if payload.shipping_cost < 0 {
        return Err(AppError::BadRequest("Shipping cost cannot be negative".into()));
    }
    for item in &payload.items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest("Item quantity must be at least 1".into()));
        }
    }

    let txn = state.orm.begin().await?;

    let cart_rows = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .all(&txn)
        .await?;
    if cart_rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty or not found".into()));
    }
    let carted: HashSet<Uuid> = cart_rows.iter().map(|row| row.variant_id).collect();

    let order_id = Uuid::new_v4();
    let mut total_amount: i64 = 0;
    let mut order_items: Vec<OrderItem> = Vec::with_capacity(payload.items.len());

    for item in &payload.items {
        if !carted.contains(&item.variant_id) {
            return Err(AppError::BadRequest(format!(
                "Variant {} is not in your cart",
                item.variant_id
            )));
        }

        let product = Products::find_by_id(item.product_id).one(&txn).await?;
        let product = match product {
            Some(p) => p,
            None => {
                return Err(AppError::BadRequest(format!(
                    "Product {} not found",
                    item.product_id
                )));
            }
        };
        if product.status != "active" {
            return Err(AppError::BadRequest(format!(
                "Product {} is not available",
                product.name
            )));
        }

        let variant = ProductVariants::find_by_id(item.variant_id).one(&txn).await?;
        let variant = match variant {
            Some(v) if v.product_id == product.id => v,
            _ => {
                return Err(AppError::BadRequest(format!(
                    "Variant {} does not belong to product {}",
                    item.variant_id, product.id
                )));
            }
        };

        // Conditional decrement: zero rows affected means another checkout
        // took the stock first.
        let decrement = ProductVariants::update_many()
            .col_expr(
                VariantCol::Stock,
                Expr::col(VariantCol::Stock).sub(item.quantity),
            )
            .filter(VariantCol::Id.eq(variant.id))
            .filter(VariantCol::Stock.gte(item.quantity))
            .exec(&txn)
            .await?;
        if decrement.rows_affected == 0 {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}",
                product.name
            )));
        }

        Products::update_many()
            .col_expr(
                ProdCol::SoldCount,
                Expr::col(ProdCol::SoldCount).add(item.quantity),
            )
            .filter(ProdCol::Id.eq(product.id))
            .exec(&txn)
            .await?;

        let price = effective_price(product.price, product.discount_price);
        total_amount += price * i64::from(item.quantity);

        let inserted = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product.id),
            variant_id: Set(variant.id),
            quantity: Set(item.quantity),
            price: Set(price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(inserted));
    }

    total_amount += payload.shipping_cost;

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        shipping_cost: Set(payload.shipping_cost),
        shipping_address: Set(payload.shipping_address),
        note: Set(payload.note),
        status: Set(OrderStatus::Pending.as_str().into()),
        feedback: Set(String::new()),
        is_deleted: Set(false),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    // Remove the purchased lines; any leftover cart rows stay.
    let purchased: Vec<Uuid> = payload.items.iter().map(|i| i.variant_id).collect();
    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::VariantId.is_in(purchased))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderCreate,
        Some(serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created successfully",
        OrderWithItems {
            order: order_from_entity(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if !user.is_admin {
        condition = condition.add(OrderCol::IsDeleted.eq(false));
    }
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if !user.is_admin && order.user_id != user.user_id {
        return Err(AppError::forbidden("Access denied"));
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Admin status transition. Moving into `cancelled` restores stock in the
/// same transaction.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let next = OrderStatus::parse(&payload.status)
        .ok_or_else(|| AppError::BadRequest("Invalid status value".into()))?;

    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(payload.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let current = OrderStatus::parse(&order.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order has unknown status")))?;

    if current == OrderStatus::Cancelled {
        return Err(AppError::forbidden("Cancelled orders cannot be updated"));
    }
    if current == OrderStatus::Done {
        return Err(AppError::forbidden("Completed orders cannot be updated"));
    }
    if !current.can_transition_to(next) {
        return Err(AppError::forbidden(format!(
            "Cannot change status from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }

    if next == OrderStatus::Cancelled {
        restock_order_items(&txn, order.id).await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(next.as_str().into());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderStatusUpdate,
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order status updated successfully",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// User self-cancel, allowed only from `pending`. Stock is restored on this
/// path too.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(payload.order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.status != OrderStatus::Pending.as_str() {
        return Err(AppError::forbidden(
            "Only orders in pending status can be cancelled by users",
        ));
    }

    restock_order_items(&txn, order.id).await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().into());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderCancel,
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order successfully cancelled",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn add_feedback(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: OrderFeedbackRequest,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.user_id != user.user_id {
        return Err(AppError::forbidden("Not authorized to add feedback"));
    }
    if order.status != OrderStatus::Done.as_str() {
        return Err(AppError::forbidden(
            "Feedback can only be added to orders with status 'done'",
        ));
    }

    let mut active: OrderActive = order.into();
    active.feedback = Set(payload.feedback);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Feedback added successfully",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn soft_delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let status = OrderStatus::parse(&order.status);
    if !matches!(status, Some(s) if s.is_terminal()) {
        return Err(AppError::forbidden(
            "Delete can only be applied to orders with status 'done' or 'cancelled'",
        ));
    }
    if order.is_deleted {
        return Err(AppError::BadRequest("Order is already deleted".into()));
    }

    let mut active: OrderActive = order.into();
    active.is_deleted = Set(true);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderSoftDelete,
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order deleted successfully",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Completed orders carrying a non-empty feedback string, newest first.
pub async fn list_feedbacks(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<FeedbackList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let condition = Condition::all()
        .add(OrderCol::Status.eq(OrderStatus::Done.as_str()))
        .add(OrderCol::Feedback.ne(""));

    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|o| FeedbackEntry {
            order_id: o.id,
            user_id: o.user_id,
            feedback: o.feedback,
            total_amount: o.total_amount,
            created_at: o.created_at.with_timezone(&Utc),
        })
        .collect();

    Ok(ApiResponse::success(
        "OK",
        FeedbackList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

/// Put every item's quantity back on its variant and roll back sold counts.
async fn restock_order_items(txn: &DatabaseTransaction, order_id: Uuid) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(txn)
        .await?;

    for item in items {
        ProductVariants::update_many()
            .col_expr(
                VariantCol::Stock,
                Expr::col(VariantCol::Stock).add(item.quantity),
            )
            .filter(VariantCol::Id.eq(item.variant_id))
            .exec(txn)
            .await?;

        Products::update_many()
            .col_expr(
                ProdCol::SoldCount,
                Expr::col(ProdCol::SoldCount).sub(item.quantity),
            )
            .filter(ProdCol::Id.eq(item.product_id))
            .filter(ProdCol::SoldCount.gte(item.quantity))
            .exec(txn)
            .await?;
    }

    Ok(())
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        shipping_cost: model.shipping_cost,
        shipping_address: model.shipping_address,
        note: model.note,
        status: model.status,
        feedback: model.feedback,
        is_deleted: model.is_deleted,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        variant_id: model.variant_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
