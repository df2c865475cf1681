use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.neomovies.ru";

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub api_base: String,
    pub store_path: PathBuf,
    pub admin_chat_id: Option<i64>,
    pub library_addr: Option<SocketAddr>,
    pub webhook: Option<WebhookConfig>,
    pub inline_cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: reqwest::Url,
    pub addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN is missing")?;
        let api_base = env::var("API_BASE")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let store_path = env::var("STORE_PATH")
            .unwrap_or_else(|_| "watch_items.json".to_string())
            .into();

        let admin_chat_id = match env::var("ADMIN_CHAT_ID") {
            Ok(raw) => parse_admin_chat_id(&raw),
            Err(_) => None,
        };
        if admin_chat_id.is_none() {
            warn!("ADMIN_CHAT_ID is not set, admin commands are disabled");
        }

        let library_addr = match env::var("LIBRARY_ADDR") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("LIBRARY_ADDR is not a socket address: {raw}"))?,
            ),
            _ => None,
        };

        let webhook = match env::var("WEBHOOK_URL") {
            Ok(raw) if !raw.trim().is_empty() => {
                let url = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("WEBHOOK_URL is not a URL: {raw}"))?;
                let addr = env::var("WEBHOOK_ADDR")
                    .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
                    .parse()
                    .context("WEBHOOK_ADDR is not a socket address")?;
                Some(WebhookConfig { url, addr })
            }
            _ => None,
        };

        let ttl_secs = env::var("INLINE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|&s| s > 0)
            .unwrap_or(30 * 60);

        let cfg = Self {
            bot_token,
            api_base,
            store_path,
            admin_chat_id,
            library_addr,
            webhook,
            inline_cache_ttl: Duration::from_secs(ttl_secs),
        };
        info!(
            api_base = %cfg.api_base,
            store = ?cfg.store_path,
            webhook = cfg.webhook.is_some(),
            library = ?cfg.library_addr,
            "configuration loaded"
        );
        Ok(cfg)
    }
}

/// Мусор или ноль: оператора нет.
fn parse_admin_chat_id(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(0) => None,
        Ok(id) => Some(id),
        Err(_) => {
            if !raw.trim().is_empty() {
                warn!("ADMIN_CHAT_ID={raw:?} is not a chat id, ignoring");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_chat_id_parsing() {
        assert_eq!(parse_admin_chat_id(" 12345 "), Some(12345));
        assert_eq!(parse_admin_chat_id("-100200"), Some(-100200));
        assert_eq!(parse_admin_chat_id("0"), None);
        assert_eq!(parse_admin_chat_id("admin"), None);
        assert_eq!(parse_admin_chat_id(""), None);
    }
}
