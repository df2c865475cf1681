use std::net::SocketAddr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::neomovies::unique_voices;
use crate::reconcile::{Reconciler, Summary};
use crate::storage::Storage;
use crate::watch::{ItemKind, WatchItem};

#[derive(Clone)]
pub struct LibraryState {
    pub storage: Storage,
    pub reconciler: Reconciler,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryItem {
    pub kp_id: u64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    pub poster_url: String,
    pub rating: f64,
    pub overview: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quality: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seasons: Vec<LibrarySeason>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seasons_count: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub episodes_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub voices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibrarySeason {
    pub number: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<LibraryEpisode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryEpisode {
    pub number: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quality: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<LibraryVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryVariant {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quality: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemParams {
    kp_id: Option<String>,
}

/// HTTP-выдача библиотеки для сайта.
pub fn router(state: LibraryState) -> Router {
    Router::new()
        .route("/api/library", get(list_library))
        .route("/api/library/item", get(library_item))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: LibraryState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "library api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn list_library(State(state): State<LibraryState>, Query(params): Query<ListParams>) -> Response {
    // мусор в limit = значение по умолчанию
    let limit = params.limit.and_then(|l| l.trim().parse::<usize>().ok()).unwrap_or(0);
    let items = state.storage.list_recent(limit).await;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        match build_item(&state.reconciler, item).await {
            Ok(li) => out.push(li),
            Err(e) => debug!(kp_id = item.kp_id, error = %e, "library item skipped"),
        }
    }
    Json(out).into_response()
}

async fn library_item(State(state): State<LibraryState>, Query(params): Query<ItemParams>) -> Response {
    let Some(id) = params
        .kp_id
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|&id| id > 0)
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(item) = state.storage.get(id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match build_item(&state.reconciler, &item).await {
        Ok(li) => Json(li).into_response(),
        Err(e) => {
            warn!(kp_id = id, error = %e, "library item metadata failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Запись библиотеки + сведённые метаданные. Список озвучек из раздач
/// необязателен: его ошибка не роняет ответ.
pub async fn build_item(reconciler: &Reconciler, item: &WatchItem) -> Result<LibraryItem, Error> {
    let movie = reconciler.resolve_movie(item.kp_id).await?;
    let summary = Summary::from_movie(item.kp_id, &movie);
    let client = reconciler.client();

    let poster_url = summary
        .poster
        .as_deref()
        .and_then(|p| client.image_url(p, "kp", item.kp_id))
        .unwrap_or_else(|| client.poster_url(item.kp_id));

    let voices = match summary.imdb.as_deref() {
        Some(imdb) => match client.torrents_by_imdb(imdb, item.kind == ItemKind::Series).await {
            Ok(torrents) => unique_voices(&torrents),
            Err(e) => {
                debug!(kp_id = item.kp_id, imdb, error = %e, "torrent voices unavailable");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let series = item.kind == ItemKind::Series;
    Ok(LibraryItem {
        kp_id: item.kp_id,
        kind: item.kind,
        title: summary.display_title(Some(item)),
        poster_url,
        rating: summary.rating,
        overview: movie.overview_text().unwrap_or_default().trim().to_string(),
        genres: summary.genres,
        voice: item.voice.trim().to_string(),
        quality: item.quality.trim().to_string(),
        seasons: if series { seasons(item) } else { Vec::new() },
        seasons_count: if series { item.seasons.len() } else { 0 },
        episodes_count: if series { item.episodes_count() } else { 0 },
        voices,
    })
}

fn seasons(item: &WatchItem) -> Vec<LibrarySeason> {
    item.seasons
        .iter()
        .map(|s| LibrarySeason {
            number: s.number,
            episodes: s
                .episodes
                .iter()
                .map(|ep| LibraryEpisode {
                    number: ep.number,
                    voice: ep.voice.trim().to_string(),
                    quality: ep.quality.trim().to_string(),
                    variants: ep
                        .variants
                        .iter()
                        .map(|v| LibraryVariant {
                            voice: v.voice.trim().to_string(),
                            quality: v.quality.trim().to_string(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}
