use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let access_token_secret = env::var("ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = env::var("REFRESH_TOKEN_SECRET")
            .unwrap_or_else(|_| access_token_secret.clone());
        Ok(Self {
            database_url,
            host,
            port,
            access_token_secret,
            refresh_token_secret,
        })
    }
}
