use std::{collections::BTreeSet, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tracing::debug;

use crate::error::{Error, Result};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(9);

#[derive(Clone)]
pub struct NeoMoviesClient {
    api_base: String,
    http: Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopularKind {
    Movies,
    Tv,
}

impl NeoMoviesClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("Mozilla/5.0 (compatible; tg-watch-library/1.0)")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Карточка по kp id. `Ok(None)`: API ответил 404, пустым телом или конвертом без `data`.
    pub async fn movie_by_kp_id(&self, kp_id: u64) -> Result<Option<Movie>> {
        if kp_id == 0 {
            return Err(Error::NotFound("kp_id 0".into()));
        }
        let url = format!("{}/api/v1/movie/kp_{}", self.api_base, kp_id);
        let Some(body) = self.get_json(&url, &[]).await? else {
            return Ok(None);
        };
        if body.is_null() || empty_envelope(&body) {
            return Ok(None);
        }
        Ok(Some(unwrap_data(body)?))
    }

    /// Поиск (RU), одна страница результатов.
    pub async fn search(&self, query: &str, page: u32) -> Result<Vec<Movie>> {
        let url = format!("{}/api/v1/movies/search", self.api_base);
        let page = page.max(1).to_string();
        let params = [("query", query), ("page", page.as_str()), ("lang", "ru")];
        let Some(body) = self.get_json(&url, &params).await? else {
            return Ok(vec![]);
        };
        let resp: SearchResp = unwrap_data(body)?;
        Ok(resp.results)
    }

    pub async fn popular(&self, kind: PopularKind, page: u32) -> Result<Vec<Movie>> {
        let path = match kind {
            PopularKind::Movies => "movies",
            PopularKind::Tv => "tv",
        };
        let url = format!("{}/api/v1/{}/popular", self.api_base, path);
        let page = page.max(1).to_string();
        let params = [("page", page.as_str()), ("lang", "ru")];
        let Some(body) = self.get_json(&url, &params).await? else {
            return Ok(vec![]);
        };
        let resp: SearchResp = unwrap_data(body)?;
        Ok(resp.results)
    }

    /// Раздачи по IMDb id, нужны только ради списка озвучек.
    pub async fn torrents_by_imdb(&self, imdb_id: &str, series: bool) -> Result<Vec<Torrent>> {
        let imdb_id = imdb_id.trim();
        if imdb_id.is_empty() {
            return Err(Error::NotFound("empty imdb id".into()));
        }
        let url = format!(
            "{}/api/v1/torrents/search/{}",
            self.api_base,
            urlencoding::encode(imdb_id)
        );
        let typ = if series { "tv" } else { "movie" };
        let Some(body) = self.get_json(&url, &[("type", typ)]).await? else {
            return Ok(vec![]);
        };
        if body.is_array() {
            return serde_json::from_value(body).map_err(|e| Error::Upstream(e.to_string()));
        }
        let wrapped: TorrentsResp = unwrap_data(body)?;
        Ok(wrapped.results)
    }

    /// Ссылка на постер через прокси API. Постеры kinopoiskapiunofficial
    /// переписываются на `/api/v1/images/...`, прочие http-ссылки отдаются как есть.
    pub fn image_url(&self, path: &str, size: &str, kp_id: u64) -> Option<String> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        if path.starts_with("http") {
            if let Some(c) = KP_POSTER_RE.captures(path) {
                return Some(format!(
                    "{}/api/v1/images/{}/{}?fallback=true",
                    self.api_base, &c[1], &c[2]
                ));
            }
            return Some(path.to_string());
        }
        if kp_id > 0 {
            return Some(format!(
                "{}/api/v1/images/{}/{}?fallback=true",
                self.api_base, size, kp_id
            ));
        }
        Some(path.to_string())
    }

    pub fn poster_url(&self, kp_id: u64) -> String {
        format!("{}/api/v1/images/kp/{}", self.api_base, kp_id)
    }

    pub fn player_url(&self, provider: &str, kp_id: u64) -> String {
        format!(
            "{}/api/v1/players/{}/kp/{}",
            self.api_base,
            urlencoding::encode(provider),
            kp_id
        )
    }

    /// `Ok(None)` на 404, `Upstream` на любой другой не-2xx.
    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Option<serde_json::Value>> {
        debug!(url, "neomovies request");
        let resp = self.http.get(url).query(params).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(512).collect();
            return Err(Error::Upstream(format!("{url}: status {status}: {body}")));
        }
        let bytes = resp.bytes().await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Upstream(format!("{url}: bad json: {e}")))
    }
}

/// API отвечает либо `{success, data}`, либо голым объектом.
fn unwrap_data<T: DeserializeOwned>(mut body: serde_json::Value) -> Result<T> {
    let inner = match body.get_mut("data") {
        Some(data) if data.is_object() || data.is_array() => data.take(),
        _ => body,
    };
    serde_json::from_value(inner).map_err(|e| Error::Upstream(format!("bad payload: {e}")))
}

// `{"data": null}` или `{"success": false}` без объекта: фильма нет
fn empty_envelope(body: &serde_json::Value) -> bool {
    match body.get("data") {
        Some(data) => !data.is_object(),
        None => body.get("success").and_then(serde_json::Value::as_bool) == Some(false),
    }
}

static KP_POSTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"kinopoiskapiunofficial\.tech/images/posters/(kp|kp_small|kp_big)/(\d+)\.jpg")
        .expect("valid poster regex")
});

/// Отсортированный список уникальных озвучек по всем раздачам.
pub fn unique_voices(torrents: &[Torrent]) -> Vec<String> {
    torrents
        .iter()
        .flat_map(|t| t.voice.iter())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/* ======= DTOs ======= */

#[derive(Deserialize, Debug, Default)]
struct SearchResp {
    #[serde(default)]
    results: Vec<Movie>,
}

#[derive(Deserialize, Debug, Default)]
struct TorrentsResp {
    #[serde(default)]
    results: Vec<Torrent>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Movie {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "nameRu", deserialize_with = "lenient_string")]
    pub name_ru: String,
    #[serde(rename = "nameOriginal", deserialize_with = "lenient_string")]
    pub name_original: String,
    #[serde(deserialize_with = "lenient_string")]
    pub overview: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(rename = "shortDescription", deserialize_with = "lenient_string")]
    pub short_description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub poster_path: String,
    #[serde(rename = "posterUrl", deserialize_with = "lenient_string")]
    pub poster_url: String,
    #[serde(rename = "posterUrlPreview", deserialize_with = "lenient_string")]
    pub poster_url_preview: String,
    #[serde(deserialize_with = "lenient_string")]
    pub release_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub year: String,
    #[serde(deserialize_with = "lenient_genres")]
    pub genres: Vec<Genre>,
    #[serde(deserialize_with = "lenient_f64")]
    pub vote_average: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub rating: f64,
    #[serde(rename = "ratingKinopoisk", deserialize_with = "lenient_f64")]
    pub rating_kinopoisk: f64,
    #[serde(deserialize_with = "lenient_u64")]
    pub kinopoisk_id: u64,
    #[serde(rename = "externalIds")]
    pub external_ids: ExternalIds,
}

impl Movie {
    /// Каталожный id: сначала externalIds.kp, затем kinopoisk_id.
    pub fn kp_id(&self) -> Option<u64> {
        [self.external_ids.kp, self.kinopoisk_id]
            .into_iter()
            .find(|&id| id > 0)
    }

    pub fn display_name(&self) -> Option<&str> {
        first_non_empty([
            self.title.as_str(),
            self.name_ru.as_str(),
            self.name.as_str(),
            self.name_original.as_str(),
        ])
    }

    pub fn overview_text(&self) -> Option<&str> {
        first_non_empty([
            self.overview.as_str(),
            self.description.as_str(),
            self.short_description.as_str(),
        ])
    }

    pub fn has_title(&self) -> bool {
        self.display_name().is_some()
    }

    pub fn has_overview(&self) -> bool {
        self.overview_text().is_some()
    }

    /// Рейтинг: rating → ratingKinopoisk → vote_average, первый ненулевой.
    pub fn best_rating(&self) -> f64 {
        [self.rating, self.rating_kinopoisk, self.vote_average]
            .into_iter()
            .find(|r| *r > 0.0)
            .unwrap_or(0.0)
    }

    /// Год: явное поле, иначе первые 4 символа даты релиза.
    pub fn year(&self) -> Option<&str> {
        let y = self.year.trim();
        if !y.is_empty() {
            return Some(y);
        }
        self.release_date.trim().get(..4)
    }

    pub fn poster(&self) -> Option<&str> {
        first_non_empty([
            self.poster_path.as_str(),
            self.poster_url_preview.as_str(),
            self.poster_url.as_str(),
        ])
    }

    pub fn genre_names(&self, limit: usize) -> Vec<&str> {
        self.genres
            .iter()
            .map(|g| g.name.trim())
            .filter(|n| !n.is_empty())
            .take(limit)
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Genre {
    #[serde(deserialize_with = "lenient_u64")]
    pub id: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExternalIds {
    #[serde(deserialize_with = "lenient_u64")]
    pub kp: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub imdb: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Torrent {
    pub title: String,
    pub quality: String,
    pub voice: Vec<String>,
}

pub fn first_non_empty<'a>(vals: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    vals.into_iter().map(str::trim).find(|v| !v.is_empty())
}

/* ======= tolerant field decoding: the API mixes strings, numbers and nulls ======= */

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_genres<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Genre>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|g| serde_json::from_value(g).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_accepts_wrapped_and_bare_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_301"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"title": "Матрица", "externalIds": {"kp": 301, "imdb": "tt0133093"}, "year": 1999}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_302"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nameRu": "Матрица: Перезагрузка", "kinopoisk_id": "302", "rating": null
            })))
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        let m = client.movie_by_kp_id(301).await.unwrap().unwrap();
        assert_eq!(m.title, "Матрица");
        assert_eq!(m.year(), Some("1999"));
        assert_eq!(m.external_ids.imdb, "tt0133093");
        assert_eq!(m.kp_id(), Some(301));

        let m = client.movie_by_kp_id(302).await.unwrap().unwrap();
        assert_eq!(m.display_name(), Some("Матрица: Перезагрузка"));
        assert_eq!(m.kp_id(), Some(302));
        assert_eq!(m.best_rating(), 0.0);
    }

    #[tokio::test]
    async fn lookup_treats_empty_envelope_as_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "data": null})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error": "not found"})))
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        assert!(client.movie_by_kp_id(5).await.unwrap().is_none());
        assert!(client.movie_by_kp_id(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/kp_2"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        assert!(client.movie_by_kp_id(1).await.unwrap().is_none());
        assert!(matches!(
            client.movie_by_kp_id(2).await,
            Err(Error::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn search_sends_query_and_reads_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movies/search"))
            .and(query_param("query", "дюна"))
            .and(query_param("page", "1"))
            .and(query_param("lang", "ru"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1,
                "results": [{"title": "Дюна", "externalIds": {"kp": 409424}}, {"title": "Дюна 2"}],
                "total_pages": 1
            })))
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        let res = client.search("дюна", 1).await.unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].kp_id(), Some(409424));
        assert_eq!(res[1].kp_id(), None);
    }

    #[tokio::test]
    async fn torrents_voices_from_either_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/torrents/search/tt1"))
            .and(query_param("type", "tv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"title": "a", "voice": ["LostFilm", " Кубик в Кубе "]},
                {"title": "b", "voice": ["LostFilm", ""]}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/torrents/search/tt2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": {"results": [{"voice": ["Дубляж"]}]}
            })))
            .mount(&server)
            .await;

        let client = NeoMoviesClient::new(server.uri());
        let t = client.torrents_by_imdb("tt1", true).await.unwrap();
        assert_eq!(unique_voices(&t), vec!["LostFilm", "Кубик в Кубе"]);
        let t = client.torrents_by_imdb("tt2", false).await.unwrap();
        assert_eq!(unique_voices(&t), vec!["Дубляж"]);
    }

    #[test]
    fn image_url_rewrites_kinopoisk_posters() {
        let c = NeoMoviesClient::new("https://api.example/");
        assert_eq!(
            c.image_url(
                "https://kinopoiskapiunofficial.tech/images/posters/kp_small/435.jpg",
                "kp",
                435
            )
            .as_deref(),
            Some("https://api.example/api/v1/images/kp_small/435?fallback=true")
        );
        assert_eq!(
            c.image_url("https://cdn.example/p.jpg", "kp", 1).as_deref(),
            Some("https://cdn.example/p.jpg")
        );
        assert_eq!(
            c.image_url("/abc.jpg", "kp_small", 7).as_deref(),
            Some("https://api.example/api/v1/images/kp_small/7?fallback=true")
        );
        assert_eq!(c.image_url("  ", "kp", 7), None);
    }
}
