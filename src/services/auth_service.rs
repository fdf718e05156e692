use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::{OsRng, RngCore};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::auth::{
        Claims, ForgotPasswordRequest, LoginRequest, LoginResponse, OtpPendingResponse,
        PendingUser, RefreshRequest, RefreshResponse, RegisterRequest, ResetPasswordRequest,
        VerifyOtpRequest,
    },
    entity::{
        otps::{ActiveModel as OtpActive, Column as OtpCol, Entity as Otps},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    models::User,
    response::{ApiResponse, Meta},
    state::AppState,
};

const OTP_TTL_MINUTES: i64 = 30;
const ACCESS_TOKEN_HOURS: i64 = 1;
const REFRESH_TOKEN_DAYS: i64 = 7;

/// Start registration: park the (pre-hashed) payload on an OTP row. The user
/// row is only materialized after verification.
pub async fn register(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<OtpPendingResponse>> {
    if payload.full_name.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.password.is_empty()
    {
        return Err(AppError::BadRequest(
            "Full name, email, and password are required".into(),
        ));
    }
    if payload.password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters long".into(),
        ));
    }
    if !is_valid_email(&payload.email) {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }

    let existing = Users::find()
        .filter(UserCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Email already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let code = generate_otp_code();
    let expires_at = Utc::now() + Duration::minutes(OTP_TTL_MINUTES);
    let pending = PendingUser {
        full_name: payload.full_name,
        password_hash,
        address: payload.address,
        phone: payload.phone,
        avatar: payload.avatar,
        gender: payload.gender,
    };
    let pending_json = serde_json::to_value(&pending)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    let existing_otp = Otps::find()
        .filter(OtpCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;

    match existing_otp {
        Some(row) => {
            let mut active: OtpActive = row.into();
            active.code = Set(code.clone());
            active.expires_at = Set(expires_at.into());
            active.pending_user = Set(Some(pending_json));
            active.update(&state.orm).await?;
        }
        None => {
            OtpActive {
                id: Set(Uuid::new_v4()),
                email: Set(payload.email.clone()),
                code: Set(code.clone()),
                expires_at: Set(expires_at.into()),
                pending_user: Set(Some(pending_json)),
                created_at: NotSet,
            }
            .insert(&state.orm)
            .await?;
        }
    }

    // Email delivery is out of scope; the code is surfaced through the logs.
    tracing::info!(email = %payload.email, otp = %code, "registration OTP issued");

    Ok(ApiResponse::success(
        "An OTP has been sent to your email. Please verify to complete registration.",
        OtpPendingResponse {
            email: payload.email,
        },
        Some(Meta::empty()),
    ))
}

pub async fn verify_otp_register(
    state: &AppState,
    payload: VerifyOtpRequest,
) -> AppResult<ApiResponse<User>> {
    if payload.email.trim().is_empty() || payload.otp.trim().is_empty() {
        return Err(AppError::BadRequest("Email and OTP are required".into()));
    }

    let stored = Otps::find()
        .filter(OtpCol::Email.eq(payload.email.clone()))
        .filter(OtpCol::Code.eq(payload.otp.clone()))
        .one(&state.orm)
        .await?;
    let stored = match stored {
        Some(row) => row,
        None => return Err(AppError::BadRequest("Invalid OTP".into())),
    };

    if stored.expires_at.with_timezone(&Utc) < Utc::now() {
        return Err(AppError::BadRequest("OTP Expired".into()));
    }

    let pending: PendingUser = stored
        .pending_user
        .clone()
        .ok_or_else(|| AppError::BadRequest("No pending registration for this email".into()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
        })?;

    let user = UserActive {
        id: Set(Uuid::new_v4()),
        full_name: Set(pending.full_name),
        email: Set(stored.email.clone()),
        password_hash: Set(pending.password_hash),
        is_admin: Set(false),
        avatar: Set(pending.avatar),
        gender: Set(pending.gender),
        phone: Set(pending.phone),
        address: Set(pending.address),
        status: Set("active".into()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Otps::delete_by_id(stored.id).exec(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        AuditAction::UserRegister,
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Registration completed",
        user_view(user),
        Some(Meta::empty()),
    ))
}

/// Start a password reset for an existing account. Reuses the OTP table with
/// no pending payload; the row's email ties the code to the account.
pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<OtpPendingResponse>> {
    if payload.email.trim().is_empty() {
        return Err(AppError::BadRequest("Email is required".into()));
    }

    let user = Users::find()
        .filter(UserCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;
    if user.is_none() {
        return Err(AppError::NotFound);
    }

    let code = generate_otp_code();
    let expires_at = Utc::now() + Duration::minutes(OTP_TTL_MINUTES);

    let existing_otp = Otps::find()
        .filter(OtpCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;
    match existing_otp {
        Some(row) => {
            let mut active: OtpActive = row.into();
            active.code = Set(code.clone());
            active.expires_at = Set(expires_at.into());
            active.pending_user = Set(None);
            active.update(&state.orm).await?;
        }
        None => {
            OtpActive {
                id: Set(Uuid::new_v4()),
                email: Set(payload.email.clone()),
                code: Set(code.clone()),
                expires_at: Set(expires_at.into()),
                pending_user: Set(None),
                created_at: NotSet,
            }
            .insert(&state.orm)
            .await?;
        }
    }

    tracing::info!(email = %payload.email, otp = %code, "password reset OTP issued");

    Ok(ApiResponse::success(
        "An OTP has been sent to your email. Use it to reset your password.",
        OtpPendingResponse {
            email: payload.email,
        },
        Some(Meta::empty()),
    ))
}

pub async fn verify_otp_reset(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<User>> {
    if payload.email.trim().is_empty() || payload.otp.trim().is_empty() {
        return Err(AppError::BadRequest("Email and OTP are required".into()));
    }
    if payload.new_password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters long".into(),
        ));
    }

    let stored = Otps::find()
        .filter(OtpCol::Email.eq(payload.email.clone()))
        .filter(OtpCol::Code.eq(payload.otp.clone()))
        .one(&state.orm)
        .await?;
    let stored = match stored {
        Some(row) => row,
        None => return Err(AppError::BadRequest("Invalid OTP".into())),
    };
    if stored.expires_at.with_timezone(&Utc) < Utc::now() {
        return Err(AppError::BadRequest("OTP Expired".into()));
    }

    let user = Users::find()
        .filter(UserCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: UserActive = user.into();
    active.password_hash = Set(hash_password(&payload.new_password)?);
    active.updated_at = Set(Utc::now().into());
    let user = active.update(&state.orm).await?;

    Otps::delete_by_id(stored.id).exec(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        AuditAction::PasswordReset,
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Password has been reset",
        user_view(user),
        Some(Meta::empty()),
    ))
}

pub async fn login(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let user = Users::find()
        .filter(UserCol::Email.eq(payload.email.clone()))
        .one(&state.orm)
        .await?;
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or password".into())),
    };

    verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::BadRequest("Invalid email or password".into()))?;

    if user.status != "active" {
        return Err(AppError::forbidden("Account is inactive"));
    }

    let access_token = issue_token(
        &user,
        &state.config.access_token_secret,
        Duration::hours(ACCESS_TOKEN_HOURS),
    )?;
    let refresh_token = issue_token(
        &user,
        &state.config.refresh_token_secret,
        Duration::days(REFRESH_TOKEN_DAYS),
    )?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        AuditAction::UserLogin,
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse {
            access_token,
            refresh_token,
        },
        Some(Meta::empty()),
    ))
}

pub async fn refresh(
    state: &AppState,
    payload: RefreshRequest,
) -> AppResult<ApiResponse<RefreshResponse>> {
    let decoded = decode::<Claims>(
        &payload.refresh_token,
        &DecodingKey::from_secret(state.config.refresh_token_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired refresh token".into()))?;

    let user_id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user id in token".into()))?;

    let user = Users::find_by_id(user_id).one(&state.orm).await?;
    let user = match user {
        Some(u) if u.status == "active" => u,
        Some(_) => return Err(AppError::forbidden("Account is inactive")),
        None => return Err(AppError::Unauthorized("User no longer exists".into())),
    };

    let access_token = issue_token(
        &user,
        &state.config.access_token_secret,
        Duration::hours(ACCESS_TOKEN_HOURS),
    )?;

    Ok(ApiResponse::success(
        "Token refreshed",
        RefreshResponse { access_token },
        Some(Meta::empty()),
    ))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, stored_hash: &str) -> AppResult<()> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::BadRequest("Invalid password".into()))
}

fn issue_token(user: &UserModel, secret: &str, ttl: Duration) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        is_admin: user.is_admin,
        status: user.status.clone(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

fn generate_otp_code() -> String {
    let n = OsRng.next_u32() % 900_000 + 100_000;
    n.to_string()
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(' ')
}

pub(crate) fn user_view(model: UserModel) -> User {
    User {
        id: model.id,
        full_name: model.full_name,
        email: model.email,
        is_admin: model.is_admin,
        avatar: model.avatar,
        gender: model.gender,
        phone: model.phone,
        address: model.address,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn email_validation_accepts_plausible_addresses() {
        assert!(is_valid_email("buyer@example.com"));
        assert!(is_valid_email("a.b@mail.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user @example.com"));
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2secret").unwrap();
        assert!(verify_password("hunter2secret", &hash).is_ok());
        assert!(verify_password("wrong", &hash).is_err());
    }
}
