use std::time::Duration;

use teloxide::types::{
    InlineQueryResult, InlineQueryResultArticle, InputMessageContent, InputMessageContentText,
};

use crate::cache::{CachedMovie, InlineCache};
use crate::error::Result;
use crate::neomovies::{Movie, NeoMoviesClient, PopularKind};
use crate::reconcile::Summary;
use crate::text::truncate;

pub const MAX_RESULTS: usize = 10;
/// Бюджет на запрос к API из инлайн-режима.
pub const SEARCH_BUDGET: Duration = Duration::from_secs(3);
const DESCRIPTION_LIMIT: usize = 180;
const DESCRIPTION_GENRES: usize = 3;
const THUMB_WIDTH: u32 = 80;
const THUMB_HEIGHT: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSource {
    Popular(PopularKind),
    Search(String),
}

impl InlineSource {
    /// Пустой запрос и пресеты `#movies`/`#tv` дают популярное, остальное ищется.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim();
        match query.to_lowercase().as_str() {
            "" | "#movies" | "movies" => InlineSource::Popular(PopularKind::Movies),
            "#tv" | "tv" | "series" => InlineSource::Popular(PopularKind::Tv),
            _ => InlineSource::Search(query.to_string()),
        }
    }

    pub async fn fetch(&self, client: &NeoMoviesClient) -> Result<Vec<Movie>> {
        match self {
            InlineSource::Popular(kind) => client.popular(*kind, 1).await,
            InlineSource::Search(q) => client.search(q, 1).await,
        }
    }
}

/// Одна строка инлайн-выдачи. Подписи у статьи нет: HTML-подпись
/// рисует карточка, куда ведёт `/get <id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineEntry {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
}

impl InlineEntry {
    pub fn message_text(&self) -> String {
        format!("/get {}", self.id)
    }

    pub fn into_result(self) -> InlineQueryResult {
        let content = InputMessageContent::Text(InputMessageContentText::new(self.message_text()));
        let mut article = InlineQueryResultArticle::new(self.id.to_string(), self.title, content);
        if !self.description.is_empty() {
            article.description = Some(self.description);
        }
        if let Some(url) = self.thumbnail.and_then(|t| reqwest::Url::parse(&t).ok()) {
            article.thumbnail_url = Some(url);
            article.thumbnail_width = Some(THUMB_WIDTH);
            article.thumbnail_height = Some(THUMB_HEIGHT);
        }
        InlineQueryResult::Article(article)
    }
}

/// Первые 10 результатов с id; каждый попадает в кэш для будущей карточки.
pub async fn build_inline_results(
    client: &NeoMoviesClient,
    cache: &InlineCache,
    movies: &[Movie],
) -> Vec<InlineEntry> {
    let mut out = Vec::with_capacity(MAX_RESULTS);
    for m in movies.iter().take(MAX_RESULTS) {
        let Some(id) = m.kp_id() else { continue };
        cache.set_default(id, CachedMovie::from(m)).await;
        out.push(entry(client, id, m));
    }
    out
}

fn entry(client: &NeoMoviesClient, id: u64, m: &Movie) -> InlineEntry {
    let s = Summary::from_movie(id, m);
    let name = s.display_title(None);
    let title = match &s.year {
        Some(y) => format!("{name} ({y})"),
        None => name,
    };

    let mut desc = Vec::with_capacity(2);
    if s.rating > 0.0 {
        desc.push(format!("Кинопоиск: {:.1}", s.rating));
    }
    let genres: Vec<&str> = s.genres.iter().map(String::as_str).take(DESCRIPTION_GENRES).collect();
    if !genres.is_empty() {
        desc.push(genres.join(", "));
    }

    InlineEntry {
        id,
        title,
        description: truncate(&desc.join(" • "), DESCRIPTION_LIMIT),
        thumbnail: s.poster.as_deref().and_then(|p| client.image_url(p, "kp_small", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neomovies::{ExternalIds, Genre};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn movie(kp: u64, title: &str) -> Movie {
        Movie {
            title: title.into(),
            external_ids: ExternalIds { kp, imdb: String::new() },
            ..Default::default()
        }
    }

    #[test]
    fn query_presets() {
        assert_eq!(InlineSource::from_query("  "), InlineSource::Popular(PopularKind::Movies));
        assert_eq!(InlineSource::from_query("#Movies"), InlineSource::Popular(PopularKind::Movies));
        assert_eq!(InlineSource::from_query("series"), InlineSource::Popular(PopularKind::Tv));
        assert_eq!(InlineSource::from_query("#tv"), InlineSource::Popular(PopularKind::Tv));
        assert_eq!(InlineSource::from_query(" дюна "), InlineSource::Search("дюна".into()));
    }

    #[tokio::test]
    async fn skips_results_without_id_and_seeds_cache() {
        let client = NeoMoviesClient::new("https://api.example");
        let cache = InlineCache::default();
        let mut alt = movie(0, "Альтернативный id");
        alt.kinopoisk_id = 77;
        let movies = vec![movie(0, "Без id"), movie(5, "Пять"), alt];

        let entries = build_inline_results(&client, &cache, &movies).await;
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 77]);
        assert_eq!(cache.get(5).await.unwrap().title, "Пять");
        assert_eq!(cache.get(77).await.unwrap().title, "Альтернативный id");
        assert_eq!(entries[0].message_text(), "/get 5");
    }

    #[tokio::test]
    async fn at_most_ten_results() {
        let client = NeoMoviesClient::new("https://api.example");
        let movies: Vec<Movie> = (1..=15).map(|i| movie(i, "x")).collect();
        let entries = build_inline_results(&client, &InlineCache::default(), &movies).await;
        assert_eq!(entries.len(), MAX_RESULTS);
    }

    #[tokio::test]
    async fn entry_texts() {
        let client = NeoMoviesClient::new("https://api.example");
        let m = Movie {
            title: "Тьма & свет".into(),
            release_date: "2017-12-01".into(),
            rating_kinopoisk: 8.04,
            overview: "Описание".into(),
            poster_url_preview: "/p.jpg".into(),
            genres: ["драма", "триллер", "фантастика", "детектив"]
                .iter()
                .map(|g| Genre { id: 0, name: g.to_string() })
                .collect(),
            external_ids: ExternalIds { kp: 1_000, imdb: String::new() },
            ..Default::default()
        };
        let entries = build_inline_results(&client, &InlineCache::default(), &[m]).await;
        let e = &entries[0];
        assert_eq!(e.title, "Тьма & свет (2017)");
        assert_eq!(e.description, "Кинопоиск: 8.0 • драма, триллер, фантастика");
        assert_eq!(
            e.thumbnail.as_deref(),
            Some("https://api.example/api/v1/images/kp_small/1000?fallback=true")
        );
    }

    #[tokio::test]
    async fn long_description_is_truncated() {
        let client = NeoMoviesClient::new("https://api.example");
        let mut m = movie(3, "Длинный");
        m.genres = vec![Genre { id: 0, name: "ж".repeat(300) }];
        let entries = build_inline_results(&client, &InlineCache::default(), &[m]).await;
        assert_eq!(entries[0].description.chars().count(), DESCRIPTION_LIMIT);
        assert!(entries[0].description.ends_with('…'));
        assert_eq!(entries[0].thumbnail, None);
    }

    #[tokio::test]
    async fn popular_series_preset_hits_tv_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tv/popular"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"results": [{"name": "Тьма", "externalIds": {"kp": 1}}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        let movies = InlineSource::from_query("#tv").fetch(&client).await.unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].display_name(), Some("Тьма"));
    }
}
