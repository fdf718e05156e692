use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::users::{ChangePasswordRequest, ToggleStatusRequest, UpdateProfileRequest, UserList},
    entity::users::{ActiveModel as UserActive, Column, Entity as Users},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::User,
    response::{ApiResponse, Meta},
    routes::params::UserListQuery,
    services::auth_service::{hash_password, user_view, verify_password},
    state::AppState,
};

pub async fn get_profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let found = Users::find_by_id(user.user_id).one(&state.orm).await?;
    match found {
        Some(u) => Ok(ApiResponse::success("OK", user_view(u), None)),
        None => Err(AppError::NotFound),
    }
}

/// Profile update over an allow-listed field subset.
pub async fn update_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    if let Some(full_name) = payload.full_name.as_ref() {
        if full_name.trim().is_empty() {
            return Err(AppError::BadRequest("Full name cannot be empty".into()));
        }
    }
    if let Some(phone) = payload.phone.as_ref() {
        if !is_valid_phone(phone) {
            return Err(AppError::BadRequest("Phone must be 10 or 11 digits".into()));
        }
    }
    if let Some(gender) = payload.gender.as_ref() {
        if !matches!(gender.as_str(), "male" | "female" | "other") {
            return Err(AppError::BadRequest(
                "Gender must be 'male', 'female' or 'other'".into(),
            ));
        }
    }

    let existing = Users::find_by_id(user.user_id).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: UserActive = existing.into();
    if let Some(full_name) = payload.full_name {
        active.full_name = Set(full_name.trim().to_string());
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(gender) = payload.gender {
        active.gender = Set(Some(gender));
    }
    if let Some(address) = payload.address {
        active.address = Set(Some(address));
    }
    if let Some(avatar) = payload.avatar {
        active.avatar = Set(Some(avatar));
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Profile updated successfully",
        user_view(updated),
        Some(Meta::empty()),
    ))
}

pub async fn change_password(
    state: &AppState,
    user: &AuthUser,
    payload: ChangePasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if payload.new_password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters long".into(),
        ));
    }

    let existing = Users::find_by_id(user.user_id).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    verify_password(&payload.old_password, &existing.password_hash)
        .map_err(|_| AppError::BadRequest("Old password is incorrect".into()))?;

    let mut active: UserActive = existing.into();
    active.password_hash = Set(hash_password(&payload.new_password)?);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::PasswordChange,
        None,
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Password changed successfully",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Admins may toggle anyone; a non-admin may only toggle their own account
/// and must re-supply the current password.
pub async fn toggle_status(
    state: &AppState,
    user: &AuthUser,
    target_id: Uuid,
    payload: ToggleStatusRequest,
) -> AppResult<ApiResponse<User>> {
    let target = Users::find_by_id(target_id).one(&state.orm).await?;
    let target = match target {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    if !user.is_admin {
        if target.id != user.user_id {
            return Err(AppError::forbidden("Admin access required"));
        }
        let password = payload
            .password
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("Password is required".into()))?;
        verify_password(password, &target.password_hash)
            .map_err(|_| AppError::BadRequest("Password is incorrect".into()))?;
    }

    let next = if target.status == "active" {
        "inactive"
    } else {
        "active"
    };

    let mut active: UserActive = target.into();
    active.status = Set(next.into());
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::UserStatusToggle,
        Some(serde_json::json!({ "target_id": updated.id, "status": updated.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Account status updated",
        user_view(updated),
        Some(Meta::empty()),
    ))
}

pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    query: UserListQuery,
) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(search) = query.search.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::FullName).ilike(pattern.clone()))
                .add(Expr::col(Column::Email).ilike(pattern.clone()))
                .add(Expr::col(Column::Phone).ilike(pattern)),
        );
    }

    let finder = Users::find()
        .filter(condition)
        .order_by_desc(Column::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(user_view)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        UserList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub fn is_valid_phone(phone: &str) -> bool {
    (10..=11).contains(&phone.len()) && phone.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_requires_ten_or_eleven_digits() {
        assert!(is_valid_phone("0912345678"));
        assert!(is_valid_phone("09123456789"));
        assert!(!is_valid_phone("091234567"));
        assert!(!is_valid_phone("091234567890"));
        assert!(!is_valid_phone("09-1234567"));
    }
}
