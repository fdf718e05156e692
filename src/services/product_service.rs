use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::extension::postgres::PgExpr;
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::products::{
        AdjustStockRequest, CreateProductRequest, LowStockList, ProductDetail, ProductList,
        UpdateProductRequest, UpdateStatusRequest, VariantInput,
    },
    entity::{
        categories::{Column as CategoryCol, Entity as Categories, Model as CategoryModel},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        product_variants::{
            ActiveModel as VariantActive, Column as VariantCol, Entity as ProductVariants,
            Model as VariantModel,
        },
        products::{ActiveModel as ProductActive, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Category, Product, ProductVariant},
    response::{ApiResponse, Meta},
    routes::params::{LowStockQuery, ProductQuery, ProductSort},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    // Full-text search takes a separate, relevance-ranked path.
    if let Some(q) = query.q.as_ref().filter(|s| !s.is_empty()) {
        return search_products(state, q, &query).await;
    }

    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();

    if query.category.is_some() || query.vehicle_type.is_some() {
        let mut cat_condition = Condition::all();
        if let Some(name) = query.category.as_ref() {
            cat_condition = cat_condition.add(CategoryCol::Name.eq(name.clone()));
        }
        if let Some(vehicle_type) = query.vehicle_type.as_ref() {
            cat_condition = cat_condition.add(CategoryCol::VehicleType.eq(vehicle_type.clone()));
        }
        let category_ids: Vec<Uuid> = Categories::find()
            .filter(cat_condition)
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if category_ids.is_empty() {
            return Ok(ApiResponse::success(
                "No products found for this category or vehicle type",
                ProductList { items: vec![] },
                Some(Meta::new(page, limit, 0)),
            ));
        }
        condition = condition.add(Column::CategoryId.is_in(category_ids));
    }

    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(Column::Status.eq(status.clone()));
    }
    if let Some(name) = query.name.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(Expr::col(Column::Name).ilike(format!("%{}%", name)));
    }
    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }
    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let mut finder = Products::find().filter(condition);
    finder = match query.sort.unwrap_or(ProductSort::Newest) {
        ProductSort::Newest => finder.order_by_desc(Column::CreatedAt),
        ProductSort::PriceAsc => finder.order_by_asc(Column::Price),
        ProductSort::PriceDesc => finder.order_by_desc(Column::Price),
        ProductSort::MostViewed => finder.order_by_desc(Column::ViewCount),
        ProductSort::MostSold => finder.order_by_desc(Column::SoldCount),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

/// Text-index search with relevance scoring, via raw SQL against the GIN
/// index created in the initial migration.
async fn search_products(
    state: &AppState,
    q: &str,
    query: &ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();

    #[derive(sqlx::FromRow)]
    struct Row {
        id: Uuid,
        name: String,
        description: Option<String>,
        price: i64,
        discount_price: i64,
        category_id: Uuid,
        images: serde_json::Value,
        status: String,
        view_count: i32,
        sold_count: i32,
        created_at: chrono::DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT id, name, description, price, discount_price, category_id,
               images, status, view_count, sold_count, created_at
        FROM products
        WHERE to_tsvector('english', name || ' ' || coalesce(description, ''))
              @@ plainto_tsquery('english', $1)
        ORDER BY ts_rank(
            to_tsvector('english', name || ' ' || coalesce(description, '')),
            plainto_tsquery('english', $1)
        ) DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(q)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM products
        WHERE to_tsvector('english', name || ' ' || coalesce(description, ''))
              @@ plainto_tsquery('english', $1)
        "#,
    )
    .bind(q)
    .fetch_one(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|r| Product {
            id: r.id,
            name: r.name,
            description: r.description,
            price: r.price,
            discount_price: r.discount_price,
            category_id: r.category_id,
            images: images_from_json(r.images),
            status: r.status,
            view_count: r.view_count,
            sold_count: r.sold_count,
            created_at: r.created_at,
        })
        .collect();

    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(Meta::new(page, limit, total.0)),
    ))
}

/// Detail read. Bumps the view counter as a side effect (at-least-once,
/// non-deduplicated across visitors).
pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    Products::update_many()
        .col_expr(Column::ViewCount, Expr::col(Column::ViewCount).add(1))
        .filter(Column::Id.eq(id))
        .exec(&state.orm)
        .await?;

    let product = Products::find_by_id(id).one(&state.orm).await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let category = Categories::find_by_id(product.category_id)
        .one(&state.orm)
        .await?
        .map(category_from_entity);

    let variants = ProductVariants::find()
        .filter(VariantCol::ProductId.eq(product.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(variant_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Product",
        ProductDetail {
            product: product_from_entity(product),
            category,
            variants,
        },
        None,
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Product name is required".into()));
    }
    validate_pricing(payload.price, payload.discount_price)?;
    if payload.images.is_empty() {
        return Err(AppError::BadRequest("Please provide at least one image".into()));
    }
    validate_variants(&payload.variants)?;

    if Categories::find_by_id(payload.category_id)
        .one(&state.orm)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest("Category not found".into()));
    }

    let name_taken = Products::find()
        .filter(Column::Name.eq(payload.name.clone()))
        .one(&state.orm)
        .await?
        .is_some();
    if name_taken {
        return Err(AppError::BadRequest(
            "Product name already exists. Please choose a different name!".into(),
        ));
    }

    let txn = state.orm.begin().await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        discount_price: Set(payload.discount_price),
        category_id: Set(payload.category_id),
        images: Set(serde_json::json!(payload.images)),
        status: Set("active".into()),
        view_count: Set(0),
        sold_count: Set(0),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut variants = Vec::with_capacity(payload.variants.len());
    for v in payload.variants {
        let inserted = VariantActive {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            color: Set(v.color),
            transmission: Set(v.transmission),
            engine: Set(v.engine),
            stock: Set(v.stock),
        }
        .insert(&txn)
        .await?;
        variants.push(variant_from_entity(inserted));
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::ProductCreate,
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created successfully",
        ProductDetail {
            product: product_from_entity(product),
            category: None,
            variants,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;

    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let price = payload.price.unwrap_or(existing.price);
    let discount_price = payload.discount_price.unwrap_or(existing.discount_price);
    validate_pricing(price, discount_price)?;

    if let Some(name) = payload.name.as_ref() {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Product name cannot be empty".into()));
        }
        let collision = Products::find()
            .filter(Column::Name.eq(name.clone()))
            .filter(Column::Id.ne(id))
            .one(&state.orm)
            .await?;
        if collision.is_some() {
            return Err(AppError::BadRequest(
                "Product name already exists. Please choose a different name!".into(),
            ));
        }
    }
    if let Some(category_id) = payload.category_id {
        if Categories::find_by_id(category_id)
            .one(&state.orm)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest("Category not found".into()));
        }
    }
    if let Some(images) = payload.images.as_ref() {
        if images.is_empty() {
            return Err(AppError::BadRequest("Please provide at least one image".into()));
        }
    }
    if let Some(variants) = payload.variants.as_ref() {
        validate_variants(variants)?;
    }

    let txn = state.orm.begin().await?;

    let mut active: ProductActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    active.price = Set(price);
    active.discount_price = Set(discount_price);
    if let Some(category_id) = payload.category_id {
        active.category_id = Set(category_id);
    }
    if let Some(images) = payload.images {
        active.images = Set(serde_json::json!(images));
    }
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&txn).await?;

    if let Some(new_variants) = payload.variants {
        // Diff against the stored rows rather than replace them: order_items
        // hold FK references to variant ids, so rows that ever sold must keep
        // their identity.
        let existing_variants = ProductVariants::find()
            .filter(VariantCol::ProductId.eq(product.id))
            .all(&txn)
            .await?;
        let (updates, inserts, stale) = diff_variants(existing_variants, new_variants);

        for (current, stock) in updates {
            if current.stock != stock {
                let mut active: VariantActive = current.into();
                active.stock = Set(stock);
                active.update(&txn).await?;
            }
        }
        for v in inserts {
            VariantActive {
                id: Set(Uuid::new_v4()),
                product_id: Set(product.id),
                color: Set(v.color),
                transmission: Set(v.transmission),
                engine: Set(v.engine),
                stock: Set(v.stock),
            }
            .insert(&txn)
            .await?;
        }
        for gone in stale {
            let referenced = OrderItems::find()
                .filter(OrderItemCol::VariantId.eq(gone.id))
                .count(&txn)
                .await?;
            if referenced > 0 {
                return Err(AppError::BadRequest(format!(
                    "Variant {}/{}/{} appears in orders and cannot be removed; set its stock to 0 instead",
                    gone.color, gone.transmission, gone.engine
                )));
            }
            ProductVariants::delete_by_id(gone.id).exec(&txn).await?;
        }
    }

    let variants = ProductVariants::find()
        .filter(VariantCol::ProductId.eq(product.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(variant_from_entity)
        .collect();

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::ProductUpdate,
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        ProductDetail {
            product: product_from_entity(product),
            category: None,
            variants,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_product_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.status != "active" && payload.status != "inactive" {
        return Err(AppError::BadRequest("Status must be 'active' or 'inactive'".into()));
    }

    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ProductActive = existing.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Product status updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let referenced = OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(id))
        .count(&state.orm)
        .await?;
    if referenced > 0 {
        return Err(AppError::BadRequest(
            "Product is referenced by orders; deactivate it instead".into(),
        ));
    }

    let result = Products::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::ProductDelete,
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<LowStockList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();
    let threshold = query.threshold.unwrap_or(5);

    let finder = ProductVariants::find()
        .filter(VariantCol::Stock.lte(threshold))
        .order_by_asc(VariantCol::Stock);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(variant_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Low stock variants",
        LowStockList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

/// Direct stock adjustment. A negative delta cannot take stock below zero.
pub async fn adjust_variant_stock(
    state: &AppState,
    user: &AuthUser,
    variant_id: Uuid,
    payload: AdjustStockRequest,
) -> AppResult<ApiResponse<ProductVariant>> {
    ensure_admin(user)?;

    let mut update = ProductVariants::update_many()
        .col_expr(
            VariantCol::Stock,
            Expr::col(VariantCol::Stock).add(payload.delta),
        )
        .filter(VariantCol::Id.eq(variant_id));
    if payload.delta < 0 {
        update = update.filter(VariantCol::Stock.gte(-payload.delta));
    }
    let result = update.exec(&state.orm).await?;
    if result.rows_affected == 0 {
        let exists = ProductVariants::find_by_id(variant_id)
            .one(&state.orm)
            .await?
            .is_some();
        return if exists {
            Err(AppError::BadRequest("Adjustment would take stock below zero".into()))
        } else {
            Err(AppError::NotFound)
        };
    }

    let variant = ProductVariants::find_by_id(variant_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::StockAdjust,
        Some(serde_json::json!({ "variant_id": variant_id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Stock adjusted",
        variant_from_entity(variant),
        Some(Meta::empty()),
    ))
}

pub fn validate_pricing(price: i64, discount_price: i64) -> AppResult<()> {
    if price <= 0 {
        return Err(AppError::BadRequest("Price must be a positive number".into()));
    }
    if discount_price < 0 {
        return Err(AppError::BadRequest(
            "Discount price must be a non-negative number".into(),
        ));
    }
    if discount_price != 0 && discount_price >= price {
        return Err(AppError::BadRequest(
            "Discount price must be less than the regular price".into(),
        ));
    }
    Ok(())
}

fn validate_variants(variants: &[VariantInput]) -> AppResult<()> {
    for v in variants {
        if v.stock < 0 {
            return Err(AppError::BadRequest("Variant stock cannot be negative".into()));
        }
        if v.color.trim().is_empty() || v.transmission.trim().is_empty() || v.engine.trim().is_empty()
        {
            return Err(AppError::BadRequest(
                "Variant color, transmission and engine are required".into(),
            ));
        }
    }
    Ok(())
}

/// Match incoming variants to stored rows by their color/transmission/engine
/// identity. Returns (rows to update with their new stock, inputs to insert,
/// rows absent from the request).
fn diff_variants(
    existing: Vec<VariantModel>,
    inputs: Vec<VariantInput>,
) -> (Vec<(VariantModel, i32)>, Vec<VariantInput>, Vec<VariantModel>) {
    let mut stale = existing;
    let mut updates = Vec::new();
    let mut inserts = Vec::new();

    for input in inputs {
        let matched = stale.iter().position(|e| {
            e.color == input.color
                && e.transmission == input.transmission
                && e.engine == input.engine
        });
        match matched {
            Some(pos) => updates.push((stale.swap_remove(pos), input.stock)),
            None => inserts.push(input),
        }
    }

    (updates, inserts, stale)
}

fn images_from_json(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        discount_price: model.discount_price,
        category_id: model.category_id,
        images: images_from_json(model.images),
        status: model.status,
        view_count: model.view_count,
        sold_count: model.sold_count,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub(crate) fn variant_from_entity(model: VariantModel) -> ProductVariant {
    ProductVariant {
        id: model.id,
        product_id: model.product_id,
        color: model.color,
        transmission: model.transmission,
        engine: model.engine,
        stock: model.stock,
    }
}

pub(crate) fn category_from_entity(model: CategoryModel) -> Category {
    Category {
        id: model.id,
        name: model.name,
        vehicle_type: model.vehicle_type,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_rejects_discount_at_or_above_price() {
        assert!(validate_pricing(20000, 0).is_ok());
        assert!(validate_pricing(20000, 18500).is_ok());
        assert!(validate_pricing(20000, 20000).is_err());
        assert!(validate_pricing(20000, 25000).is_err());
    }

    #[test]
    fn pricing_rejects_non_positive_price() {
        assert!(validate_pricing(0, 0).is_err());
        assert!(validate_pricing(-1, 0).is_err());
    }

    fn variant_row(color: &str, transmission: &str, engine: &str, stock: i32) -> VariantModel {
        VariantModel {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            color: color.into(),
            transmission: transmission.into(),
            engine: engine.into(),
            stock,
        }
    }

    fn variant_input(color: &str, transmission: &str, engine: &str, stock: i32) -> VariantInput {
        VariantInput {
            color: color.into(),
            transmission: transmission.into(),
            engine: engine.into(),
            stock,
        }
    }

    #[test]
    fn diff_keeps_identity_of_matching_variants() {
        let red = variant_row("red", "manual", "petrol", 5);
        let red_id = red.id;
        let (updates, inserts, stale) = diff_variants(
            vec![red],
            vec![variant_input("red", "manual", "petrol", 9)],
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.id, red_id);
        assert_eq!(updates[0].1, 9);
        assert!(inserts.is_empty());
        assert!(stale.is_empty());
    }

    #[test]
    fn diff_separates_new_and_removed_variants() {
        let red = variant_row("red", "manual", "petrol", 5);
        let black = variant_row("black", "automatic", "petrol", 3);
        let black_id = black.id;
        let (updates, inserts, stale) = diff_variants(
            vec![red, black],
            vec![
                variant_input("red", "manual", "petrol", 5),
                variant_input("white", "automatic", "diesel", 2),
            ],
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].color, "white");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, black_id);
    }

    #[test]
    fn variants_require_stock_and_fields() {
        let bad_stock = vec![VariantInput {
            color: "red".into(),
            transmission: "automatic".into(),
            engine: "2.0L".into(),
            stock: -1,
        }];
        assert!(validate_variants(&bad_stock).is_err());

        let empty_field = vec![VariantInput {
            color: "".into(),
            transmission: "manual".into(),
            engine: "1.6L".into(),
            stock: 3,
        }];
        assert!(validate_variants(&empty_field).is_err());
    }
}
