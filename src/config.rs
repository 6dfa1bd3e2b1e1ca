use serde::Deserialize;
use std::time::Duration;

/// Destination used when `WEBHOOK_URL` is not set. Deliveries still run so the
/// retry and fallback path stays observable in development.
pub const DEFAULT_WEBHOOK_URL: &str = "https://webhook.site/unique-id-here";
pub const DEFAULT_ALERT_EMAIL: &str = "admin@quotelinker.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub port: u16,
    pub webhook_url: String,
    pub webhook_timeout_ms: u64,
    pub webhook_max_retries: u32,
    pub webhook_retry_base_ms: u64,
    pub alert_fallback_email: String,
    pub admin_token: Option<String>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Zero disables the periodic re-delivery sweep.
    pub delivery_sweep_interval_secs: u64,
    pub cookie_secure: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: parse_var("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            port: parse_var("PORT", 3000)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            webhook_url: match non_empty_var("WEBHOOK_URL") {
                Some(raw) => {
                    let parsed = url::Url::parse(&raw)
                        .map_err(|e| anyhow::anyhow!("WEBHOOK_URL is not a valid URL: {}", e))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("WEBHOOK_URL must start with http:// or https://");
                    }
                    raw
                }
                None => {
                    tracing::warn!(
                        "WEBHOOK_URL not configured, using stub URL for testing: {}",
                        DEFAULT_WEBHOOK_URL
                    );
                    DEFAULT_WEBHOOK_URL.to_string()
                }
            },
            webhook_timeout_ms: parse_var("WEBHOOK_TIMEOUT_MS", 10_000)?,
            webhook_max_retries: parse_var("WEBHOOK_MAX_RETRIES", 3)?,
            webhook_retry_base_ms: parse_var("WEBHOOK_RETRY_BASE_MS", 1_000)?,
            alert_fallback_email: non_empty_var("ALERT_FALLBACK_EMAIL").unwrap_or_else(|| {
                tracing::warn!(
                    "ALERT_FALLBACK_EMAIL not configured, using stub email: {}",
                    DEFAULT_ALERT_EMAIL
                );
                DEFAULT_ALERT_EMAIL.to_string()
            }),
            admin_token: non_empty_var("ADMIN_TOKEN"),
            rate_limit_max_requests: parse_var("RATE_LIMIT_MAX_REQUESTS", 5)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", 60)?,
            delivery_sweep_interval_secs: parse_var("DELIVERY_SWEEP_INTERVAL_SECS", 0)?,
            cookie_secure: parse_var("COOKIE_SECURE", true)?,
        };

        if config.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be positive");
        }
        if config.rate_limit_max_requests == 0 || config.rate_limit_window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_MAX_REQUESTS and RATE_LIMIT_WINDOW_SECS must be positive");
        }
        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not configured, admin endpoints will reject every request");
        }

        // Never log secrets in full
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Webhook URL: {}", config.webhook_url);
        tracing::debug!(
            "Webhook timeout: {}ms, max retries: {}, base delay: {}ms",
            config.webhook_timeout_ms,
            config.webhook_max_retries,
            config.webhook_retry_base_ms
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn webhook_retry_base(&self) -> Duration {
        Duration::from_millis(self.webhook_retry_base_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Interval of the undelivered-lead sweep, if enabled.
    pub fn delivery_sweep_interval(&self) -> Option<Duration> {
        (self.delivery_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.delivery_sweep_interval_secs))
    }
}

impl Default for Config {
    /// Local-development defaults. `from_env` is the production path.
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/quotelinker".to_string(),
            db_max_connections: 10,
            db_acquire_timeout_secs: 5,
            port: 3000,
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            webhook_timeout_ms: 10_000,
            webhook_max_retries: 3,
            webhook_retry_base_ms: 1_000,
            alert_fallback_email: DEFAULT_ALERT_EMAIL.to_string(),
            admin_token: None,
            rate_limit_max_requests: 5,
            rate_limit_window_secs: 60,
            delivery_sweep_interval_secs: 0,
            cookie_secure: true,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_durations() {
        let config = Config::default();
        assert_eq!(config.db_acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.webhook_timeout(), Duration::from_secs(10));
        assert_eq!(config.webhook_retry_base(), Duration::from_secs(1));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.delivery_sweep_interval(), None);
    }

    #[test]
    fn test_sweep_interval_enabled() {
        let config = Config {
            delivery_sweep_interval_secs: 300,
            ..Config::default()
        };
        assert_eq!(
            config.delivery_sweep_interval(),
            Some(Duration::from_secs(300))
        );
    }
}
