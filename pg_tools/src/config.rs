use gbm_common::Secret;
use log::*;

pub const DEFAULT_GATEWAY_API_URL: &str = "https://api.portone.io";

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub api_secret: Secret<String>,
    pub store_id: Option<String>,
}

impl GatewayConfig {
    pub fn new_from_env_or_default() -> Self {
        let api_url = std::env::var("GBM_GATEWAY_API_URL").unwrap_or_else(|_| {
            warn!("🪛️ GBM_GATEWAY_API_URL not set, using {DEFAULT_GATEWAY_API_URL}");
            DEFAULT_GATEWAY_API_URL.to_string()
        });
        let api_secret = Secret::new(std::env::var("GBM_GATEWAY_API_SECRET").unwrap_or_else(|_| {
            warn!("🪛️ GBM_GATEWAY_API_SECRET not set. Gateway calls will be rejected.");
            String::default()
        }));
        let store_id = std::env::var("GBM_GATEWAY_STORE_ID").ok().filter(|s| !s.trim().is_empty());
        if store_id.is_none() {
            info!("🪛️ GBM_GATEWAY_STORE_ID not set. Requests will use the API secret's default store.");
        }
        Self { api_url, api_secret, store_id }
    }
}
