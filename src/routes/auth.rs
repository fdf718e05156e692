use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, OtpPendingResponse, RefreshRequest,
        RefreshResponse, RegisterRequest, ResetPasswordRequest, VerifyOtpRequest,
    },
    error::AppResult,
    models::User,
    response::ApiResponse,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify-otp-register", post(verify_otp_register))
        .route("/forgot-password", post(forgot_password))
        .route("/verify-otp-reset", post(verify_otp_reset))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "OTP issued for password reset", body = ApiResponse<OtpPendingResponse>),
        (status = 404, description = "No account with that email")
    ),
    tag = "Auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<OtpPendingResponse>>> {
    let resp = auth_service::forgot_password(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-otp-reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = ApiResponse<User>),
        (status = 400, description = "Invalid or expired OTP")
    ),
    tag = "Auth"
)]
pub async fn verify_otp_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = auth_service::verify_otp_reset(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "OTP issued for pending registration", body = ApiResponse<OtpPendingResponse>),
        (status = 400, description = "Validation failure or email taken")
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<OtpPendingResponse>>> {
    let resp = auth_service::register(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-otp-register",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Registration completed", body = ApiResponse<User>),
        (status = 400, description = "Invalid or expired OTP")
    ),
    tag = "Auth"
)]
pub async fn verify_otp_register(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = auth_service::verify_otp_register(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login user", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid credentials"),
        (status = 403, description = "Account inactive")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = auth_service::login(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = ApiResponse<RefreshResponse>),
        (status = 401, description = "Invalid refresh token")
    ),
    tag = "Auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<RefreshResponse>>> {
    let resp = auth_service::refresh(&state, payload).await?;
    Ok(Json(resp))
}
