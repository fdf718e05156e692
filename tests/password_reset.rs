use carsupper_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool},
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
        VerifyOtpRequest,
    },
    entity::otps::{Column as OtpCol, Entity as Otps},
    error::AppError,
    services::auth_service,
    state::AppState,
};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Statement};

// Account recovery: request an OTP for an existing account, reset the
// password with it, then sign in with the new credentials.
#[tokio::test]
async fn password_reset_via_otp() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;
    let email = "owner@example.com";

    // Unknown accounts cannot start a reset.
    let missing = auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: "nobody@example.com".into(),
        },
    )
    .await
    .expect_err("reset for unknown email should fail");
    assert!(matches!(missing, AppError::NotFound));

    // Register and verify a real account first.
    auth_service::register(
        &state,
        RegisterRequest {
            full_name: "Owner".into(),
            email: email.into(),
            password: "original-pass".into(),
            address: None,
            phone: None,
            avatar: None,
            gender: None,
        },
    )
    .await?;
    let code = otp_code_for(&state, email).await?;
    auth_service::verify_otp_register(
        &state,
        VerifyOtpRequest {
            email: email.into(),
            otp: code,
        },
    )
    .await?;

    auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: email.into(),
        },
    )
    .await?;
    let code = otp_code_for(&state, email).await?;

    // A short replacement password is rejected before the OTP is consumed.
    let short = auth_service::verify_otp_reset(
        &state,
        ResetPasswordRequest {
            email: email.into(),
            otp: code.clone(),
            new_password: "tiny".into(),
        },
    )
    .await
    .expect_err("short password should fail");
    assert!(matches!(short, AppError::BadRequest(_)));

    auth_service::verify_otp_reset(
        &state,
        ResetPasswordRequest {
            email: email.into(),
            otp: code.clone(),
            new_password: "fresh-secret".into(),
        },
    )
    .await?;

    // The OTP is single use.
    let reuse = auth_service::verify_otp_reset(
        &state,
        ResetPasswordRequest {
            email: email.into(),
            otp: code,
            new_password: "another-secret".into(),
        },
    )
    .await
    .expect_err("consumed OTP should fail");
    assert!(matches!(reuse, AppError::BadRequest(_)));

    // Old password no longer works, the new one does.
    auth_service::login(
        &state,
        LoginRequest {
            email: email.into(),
            password: "original-pass".into(),
        },
    )
    .await
    .expect_err("old password should be rejected");

    let login = auth_service::login(
        &state,
        LoginRequest {
            email: email.into(),
            password: "fresh-secret".into(),
        },
    )
    .await?;
    assert!(!login.data.unwrap().access_token.is_empty());

    Ok(())
}

async fn otp_code_for(state: &AppState, email: &str) -> anyhow::Result<String> {
    let row = Otps::find()
        .filter(OtpCol::Email.eq(email))
        .one(&state.orm)
        .await?
        .expect("OTP row for email");
    Ok(row.code)
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_items, wishlists, audit_logs, product_variants, products, categories, otps, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        access_token_secret: "test-access-secret".into(),
        refresh_token_secret: "test-refresh-secret".into(),
    };

    Ok(AppState { pool, orm, config })
}
