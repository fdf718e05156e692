use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
    dto::products::UpdateStatusRequest,
    entity::{
        categories::{ActiveModel as CategoryActive, Column, Entity as Categories},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{ApiResponse, Meta},
    services::product_service::category_from_entity,
    state::AppState,
};

pub async fn list_categories(
    state: &AppState,
    status: Option<String>,
) -> AppResult<ApiResponse<CategoryList>> {
    let mut condition = Condition::all();
    if let Some(status) = status.filter(|s| s == "active" || s == "inactive") {
        condition = condition.add(Column::Status.eq(status));
    }

    let items = Categories::find()
        .filter(condition)
        .order_by_desc(Column::Status)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(category_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Get categories successfully",
        CategoryList { items },
        None,
    ))
}

pub async fn get_category(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Category>> {
    let category = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(category_from_entity);
    match category {
        Some(c) => Ok(ApiResponse::success("Get category successfully", c, None)),
        None => Err(AppError::NotFound),
    }
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".into()));
    }

    let exists = Categories::find()
        .filter(Column::Name.eq(payload.name.clone()))
        .one(&state.orm)
        .await?
        .is_some();
    if exists {
        return Err(AppError::BadRequest(
            "Category name already exists. Please choose a different name!".into(),
        ));
    }

    let category = CategoryActive {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        vehicle_type: Set(payload.vehicle_type),
        status: Set("active".into()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CategoryCreate,
        Some(serde_json::json!({ "category_id": category.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Category created successfully",
        category_from_entity(category),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;

    let existing = Categories::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    if let Some(name) = payload.name.as_ref() {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".into()));
        }
        let collision = Categories::find()
            .filter(Column::Name.eq(name.clone()))
            .filter(Column::Id.ne(id))
            .one(&state.orm)
            .await?;
        if collision.is_some() {
            return Err(AppError::BadRequest("Category name already exists".into()));
        }
    }

    let mut active: CategoryActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(vehicle_type) = payload.vehicle_type {
        active.vehicle_type = Set(Some(vehicle_type));
    }
    active.updated_at = Set(Utc::now().into());
    let category = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Category updated successfully",
        category_from_entity(category),
        Some(Meta::empty()),
    ))
}

pub async fn update_category_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    if payload.status != "active" && payload.status != "inactive" {
        return Err(AppError::BadRequest("Status must be 'active' or 'inactive'".into()));
    }

    let existing = Categories::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let mut active: CategoryActive = existing.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let category = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Category status updated",
        category_from_entity(category),
        Some(Meta::empty()),
    ))
}

/// Deletion is blocked while any product still references the category.
pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let referenced = Products::find()
        .filter(ProdCol::CategoryId.eq(id))
        .count(&state.orm)
        .await?;
    if referenced > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete category while products reference it".into(),
        ));
    }

    let result = Categories::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CategoryDelete,
        Some(serde_json::json!({ "category_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Category deleted successfully",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
