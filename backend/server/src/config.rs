use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub request_timeout: Duration,
    pub allowed_origin: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub refresh_expiry_days: i64,
    pub telegram_bot_token: Option<String>,
    pub allow_unverified_login: bool,
    pub admin_telegram_ids: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env file");
        }

        let jwt_secret = read_secret("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters");
        }

        let admin_telegram_ids = try_load::<String>("ADMIN_TELEGRAM_IDS", "")?
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            database_path: try_load("DATABASE_PATH", "helpboard.db")?,
            request_timeout: Duration::from_secs(try_load("REQUEST_TIMEOUT_SECS", "10")?),
            allowed_origin: try_load("ALLOWED_ORIGIN", "*")?,
            jwt_secret,
            jwt_expiry_hours: try_load("JWT_EXPIRY_HOURS", "24")?,
            refresh_expiry_days: try_load("REFRESH_EXPIRY_DAYS", "7")?,
            telegram_bot_token: read_secret("TELEGRAM_BOT_TOKEN").ok(),
            allow_unverified_login: try_load("ALLOW_UNVERIFIED_LOGIN", "false")?,
            admin_telegram_ids,
        })
    }

    pub fn is_admin_telegram_id(&self, telegram_id: &str) -> bool {
        self.admin_telegram_ids.iter().any(|id| id == telegram_id)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("Environment misconfigured: {key}")
        })
}

/// Docker secrets first, then the plain environment.
fn read_secret(secret_name: &str) -> Result<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(secret.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}");

            var(secret_name)
                .map(|secret| secret.trim().to_string())
                .filter(|secret| !secret.is_empty())
                .with_context(|| format!("Secrets misconfigured: {secret_name}"))
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_path: ":memory:".to_string(),
            request_timeout: Duration::from_secs(5),
            allowed_origin: "*".to_string(),
            jwt_secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            jwt_expiry_hours: 1,
            refresh_expiry_days: 1,
            telegram_bot_token: Some("123456:TEST-BOT-TOKEN".to_string()),
            allow_unverified_login: false,
            admin_telegram_ids: vec!["900".to_string()],
        }
    }
}
