use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use catmap_api::auth::AdminSeed;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "catmap=debug,catmap_api=debug,catmap_db=info,tower_http=debug";

/// Placeholder JWT secrets that MUST NOT be used.
pub const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me", "asdf"];

pub struct Config {
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub token_ttl_hours: i64,
    pub admin: Option<AdminSeed>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("CATMAP_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("CATMAP_JWT_SECRET is unset or still a placeholder");
        }

        let port = get("CATMAP_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("CATMAP_PORT must be a port number")?;
        let token_ttl_hours = get("CATMAP_TOKEN_TTL_HOURS")
            .unwrap_or_else(|| "24".into())
            .parse()
            .context("CATMAP_TOKEN_TTL_HOURS must be a whole number of hours")?;

        let admin = match (get("CATMAP_ADMIN_EMAIL"), get("CATMAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                user_name: get("CATMAP_ADMIN_USER_NAME").unwrap_or_else(|| "admin".into()),
                email,
                password,
            }),
            (None, None) => None,
            _ => bail!("CATMAP_ADMIN_EMAIL and CATMAP_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            jwt_secret,
            host: get("CATMAP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("CATMAP_DB_PATH").unwrap_or_else(|| "catmap.db".into()).into(),
            upload_dir: get("CATMAP_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            token_ttl_hours,
            admin,
        })
    }
}
