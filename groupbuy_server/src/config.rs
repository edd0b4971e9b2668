use std::{env, str::FromStr, time::Duration};

use gbm_common::{parse_boolean_flag, Secret};
use groupbuy_engine::{DEFAULT_LOCK_WAIT, DEFAULT_PROVIDER};
use log::*;
use pg_tools::GatewayConfig;

const DEFAULT_GBM_HOST: &str = "127.0.0.1";
const DEFAULT_GBM_PORT: u16 = 8460;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;
const DEFAULT_CAMPAIGN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// How long a request waits for a contended row lock before it fails with a retryable error.
    pub lock_wait: Duration,
    /// How often campaigns past their deadline are closed.
    pub campaign_sweep_interval: Duration,
    pub gateway: GatewayConfig,
    /// Namespaces provider transaction ids, so that the same id from two providers is not treated as a duplicate.
    pub provider: String,
    pub webhook: WebhookConfig,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub secret: Secret<String>,
    pub tolerance_secs: i64,
    /// If false, webhook signatures are not checked. **DANGER**
    pub checks: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { secret: Secret::default(), tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS, checks: true }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GBM_HOST.to_string(),
            port: DEFAULT_GBM_PORT,
            database_url: String::default(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            lock_wait: DEFAULT_LOCK_WAIT,
            campaign_sweep_interval: DEFAULT_CAMPAIGN_SWEEP_INTERVAL,
            gateway: GatewayConfig::default(),
            provider: DEFAULT_PROVIDER.to_string(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("GBM_HOST").ok().unwrap_or_else(|| DEFAULT_GBM_HOST.into());
        let port = parse_env("GBM_PORT", DEFAULT_GBM_PORT);
        let database_url = env::var("GBM_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ GBM_DATABASE_URL is not set. Please set it to the URL for the marketplace database.");
            String::default()
        });
        let db_max_connections = parse_env("GBM_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        let lock_wait = Duration::from_millis(parse_env("GBM_LOCK_WAIT_MS", DEFAULT_LOCK_WAIT.as_millis() as u64));
        let campaign_sweep_interval = Duration::from_secs(parse_env(
            "GBM_CAMPAIGN_SWEEP_INTERVAL_SECS",
            DEFAULT_CAMPAIGN_SWEEP_INTERVAL.as_secs(),
        ));
        if campaign_sweep_interval.is_zero() {
            warn!("🪛️ GBM_CAMPAIGN_SWEEP_INTERVAL_SECS is zero. The campaign sweeper will not run.");
        }
        let gateway = GatewayConfig::new_from_env_or_default();
        let provider = env::var("GBM_GATEWAY_PROVIDER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let webhook = WebhookConfig::from_env_or_default();
        Self {
            host,
            port,
            database_url,
            db_max_connections,
            lock_wait,
            campaign_sweep_interval,
            gateway,
            provider,
            webhook,
        }
    }
}

impl WebhookConfig {
    pub fn from_env_or_default() -> Self {
        let secret = env::var("GBM_WEBHOOK_SECRET").ok().unwrap_or_else(|| {
            error!(
                "🪛️ GBM_WEBHOOK_SECRET is not set. Please set it to the webhook signing secret from the payment \
                 gateway console."
            );
            String::default()
        });
        let tolerance_secs = parse_env("GBM_WEBHOOK_TOLERANCE_SECS", DEFAULT_WEBHOOK_TOLERANCE_SECS);
        let checks = parse_boolean_flag(env::var("GBM_WEBHOOK_CHECKS").ok(), true);
        if !checks {
            warn!(
                "🚨️ Webhook signature checks are DISABLED. Anyone can forge payment notifications. Only do this in \
                 local test environments."
            );
        }
        Self { secret: Secret::new(secret), tolerance_secs, checks }
    }
}

fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .map(|s| {
            s.trim().parse::<T>().unwrap_or_else(|e| {
                error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
                default
            })
        })
        .unwrap_or_else(|_| {
            info!("🪛️ {name} is not set. Using the default, {default}.");
            default
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::new("0.0.0.0", 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.db_max_connections, 25);
        assert_eq!(config.provider, "portone");
        assert_eq!(config.campaign_sweep_interval, Duration::from_secs(60));
        assert!(config.webhook.checks);
        assert_eq!(config.webhook.tolerance_secs, 300);
    }

    #[test]
    fn bad_values_fall_back_to_the_default() {
        env::set_var("GBM_TEST_PARSE_PORT", "eighty");
        assert_eq!(parse_env("GBM_TEST_PARSE_PORT", 8460u16), 8460);
        env::set_var("GBM_TEST_PARSE_PORT", " 8080 ");
        assert_eq!(parse_env("GBM_TEST_PARSE_PORT", 8460u16), 8080);
        env::remove_var("GBM_TEST_PARSE_PORT");
        assert_eq!(parse_env("GBM_TEST_PARSE_PORT", 8460u16), 8460);
    }
}
