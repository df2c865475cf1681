mod admin;
mod cache;
mod callback;
mod card;
mod config;
mod error;
mod inline;
mod keyboard;
mod neomovies;
mod reconcile;
mod storage;
mod text;
mod tg;
mod watch;
mod web;

use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::Config::from_env()?;
    let bot = Bot::new(&cfg.bot_token);

    let storage = storage::Storage::new(&cfg.store_path).await?;
    let client = neomovies::NeoMoviesClient::new(&cfg.api_base);
    let cache = cache::InlineCache::new(cfg.inline_cache_ttl);
    let reconciler = reconcile::Reconciler::new(client, cache.clone());

    if let Some(addr) = cfg.library_addr {
        let state = web::LibraryState {
            storage: storage.clone(),
            reconciler: reconciler.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = web::serve(addr, state).await {
                error!(error = %e, "library api stopped");
            }
        });
    }

    let app = tg::App {
        storage,
        reconciler,
        cache,
        admin_chat_id: cfg.admin_chat_id,
    };
    info!("bot starting");
    tg::run(bot, app, cfg.webhook).await
}
