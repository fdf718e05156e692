use argon2::{
    Argon2, PasswordHasher,
    password_hash::{rand_core::OsRng, SaltString},
};
use carsupper_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user(&pool, "Admin", "admin@example.com", "admin123", true).await?;
    let user_id = ensure_user(&pool, "Demo User", "user@example.com", "user123", false).await?;
    seed_catalog(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    full_name: &str,
    email: &str,
    password: &str,
    is_admin: bool,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, full_name, email, password_hash, is_admin)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET is_admin = EXCLUDED.is_admin
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .bind(password_hash)
    .bind(is_admin)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (admin={is_admin})");
    Ok(user_id)
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let category_id: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name, vehicle_type)
        VALUES ($1, 'City Cars', 'car')
        ON CONFLICT (name) DO UPDATE SET vehicle_type = EXCLUDED.vehicle_type
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .fetch_one(pool)
    .await?;

    let products = vec![
        ("Vento Hatch 1.2", "Compact city hatchback", 320_000_000_i64, 300_000_000_i64),
        ("Vento Sedan 1.5", "Family sedan with a frugal engine", 450_000_000, 0),
        ("Strada Sport 2.0", "Turbocharged weekend toy", 780_000_000, 735_000_000),
    ];

    for (name, desc, price, discount) in products {
        let product: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO products (id, name, description, price, discount_price, category_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(discount)
        .bind(category_id.0)
        .fetch_optional(pool)
        .await?;

        if let Some((product_id,)) = product {
            for (color, transmission, engine, stock) in [
                ("white", "manual", "petrol", 5),
                ("black", "automatic", "petrol", 3),
            ] {
                sqlx::query(
                    r#"
                    INSERT INTO product_variants (id, product_id, color, transmission, engine, stock)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(product_id)
                .bind(color)
                .bind(transmission)
                .bind(engine)
                .bind(stock)
                .execute(pool)
                .await?;
            }
        }
    }

    println!("Seeded catalog");
    Ok(())
}
