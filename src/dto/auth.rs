use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub gender: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpPendingResponse {
    pub email: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub is_admin: bool,
    pub status: String,
    pub exp: usize,
}

/// Registration payload parked on the OTP row until verification. The
/// password arrives here already hashed.
#[derive(Debug, Deserialize, Serialize)]
pub struct PendingUser {
    pub full_name: String,
    pub password_hash: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub gender: Option<String>,
}
