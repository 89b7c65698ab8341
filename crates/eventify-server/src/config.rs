use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Development fallback; refused when `EVENTIFY_ENV` is not `development`.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub allow_admin_signup: bool,
    pub media_dir: PathBuf,
    pub public_url: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub currency: String,
    pub frontend_url: String,
    pub smtp: Option<SmtpSettings>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let development = or("EVENTIFY_ENV", "development") == "development";

        let jwt_secret = or("EVENTIFY_JWT_SECRET", DEV_JWT_SECRET);
        if jwt_secret == DEV_JWT_SECRET && !development {
            bail!("EVENTIFY_JWT_SECRET must be set to a real secret outside development");
        }

        let host = or("EVENTIFY_HOST", "0.0.0.0");
        let port: u16 = or("EVENTIFY_PORT", "5000")
            .parse()
            .context("EVENTIFY_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let token_ttl_hours: i64 = or("EVENTIFY_TOKEN_TTL_HOURS", "24")
            .parse()
            .context("EVENTIFY_TOKEN_TTL_HOURS must be a whole number")?;
        if token_ttl_hours <= 0 {
            bail!("EVENTIFY_TOKEN_TTL_HOURS must be positive");
        }

        let smtp = match (var("SMTP_HOST"), var("EMAIL_FROM")) {
            (Some(host), Some(from)) => Some(SmtpSettings {
                host,
                port: or("SMTP_PORT", "587")
                    .parse()
                    .context("SMTP_PORT must be a port number")?,
                username: or("SMTP_USERNAME", ""),
                password: or("SMTP_PASSWORD", ""),
                from,
            }),
            _ => None,
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(or("EVENTIFY_DB_PATH", "eventify.db")),
            jwt_secret,
            token_ttl_hours,
            allow_admin_signup: matches!(
                or("EVENTIFY_ALLOW_ADMIN_SIGNUP", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            media_dir: PathBuf::from(or("EVENTIFY_MEDIA_DIR", "./uploads")),
            public_url: or("EVENTIFY_PUBLIC_URL", "http://localhost:5000"),
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: or("STRIPE_API_BASE", "https://api.stripe.com"),
            currency: or("EVENTIFY_CURRENCY", "inr").to_ascii_lowercase(),
            frontend_url: or("FRONTEND_URL", "http://localhost:5173"),
            smtp,
        })
    }
}
