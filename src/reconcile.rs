use tracing::{debug, warn};

use crate::cache::{CachedMovie, InlineCache};
use crate::error::{Error, Result};
use crate::neomovies::{first_non_empty, Movie, NeoMoviesClient};
use crate::text::clip;
use crate::watch::WatchItem;

pub const OVERVIEW_LIMIT: usize = 900;

/// Сведённые метаданные для карточки.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub id: u64,
    pub title: Option<String>,
    pub year: Option<String>,
    pub rating: f64,
    pub overview: Option<String>,
    pub genres: Vec<String>,
    pub poster: Option<String>,
    pub imdb: Option<String>,
}

impl Summary {
    pub fn from_movie(id: u64, m: &Movie) -> Self {
        Self {
            id,
            title: m.display_name().map(str::to_string),
            year: m.year().map(str::to_string),
            rating: m.best_rating(),
            overview: m.overview_text().map(|o| clip(o, OVERVIEW_LIMIT)),
            genres: m.genre_names(usize::MAX).into_iter().map(str::to_string).collect(),
            poster: m.poster().map(str::to_string),
            imdb: first_non_empty([m.external_ids.imdb.as_str()]).map(str::to_string),
        }
    }

    /// Заголовок карточки: метаданные → название в библиотеке → `id_<id>`.
    pub fn display_title(&self, item: Option<&WatchItem>) -> String {
        if let Some(t) = &self.title {
            return t.clone();
        }
        match item {
            Some(item) => item.display_title(),
            None => format!("id_{}", self.id),
        }
    }
}

/// Основной запрос по id + кэш инлайн-поиска + поиск по id как запасной источник.
#[derive(Clone)]
pub struct Reconciler {
    client: NeoMoviesClient,
    cache: InlineCache,
}

impl Reconciler {
    pub fn new(client: NeoMoviesClient, cache: InlineCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &NeoMoviesClient {
        &self.client
    }

    pub async fn resolve(&self, id: u64) -> Result<Summary> {
        Ok(Summary::from_movie(id, &self.resolve_movie(id).await?))
    }

    /// Полный документ после всех дозаполнений.
    pub async fn resolve_movie(&self, id: u64) -> Result<Movie> {
        let mut movie = self
            .client
            .movie_by_kp_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("kp_id {id}")))?;
        match movie.kp_id() {
            Some(got) if got != id => {
                return Err(Error::NotFound(format!("kp_id {id}: api returned {got}")));
            }
            Some(_) => {}
            None => movie.external_ids.kp = id,
        }

        if let Some(cached) = self.cache.get(id).await {
            debug!(kp_id = id, "filling gaps from inline cache");
            fill_missing(&mut movie, &Movie::from(&cached));
        }

        if !movie.has_title() || !movie.has_overview() {
            match self.client.search(&id.to_string(), 1).await {
                Ok(results) => {
                    if let Some(hit) = results.iter().find(|m| m.kp_id() == Some(id)) {
                        debug!(kp_id = id, "filling gaps from search");
                        fill_missing(&mut movie, hit);
                    }
                }
                Err(e) => warn!(kp_id = id, error = %e, "fallback search failed"),
            }
        }
        Ok(movie)
    }
}

impl From<&CachedMovie> for Movie {
    fn from(c: &CachedMovie) -> Self {
        Movie {
            title: c.title.clone(),
            year: c.year.clone(),
            overview: c.overview.clone(),
            description: c.description.clone(),
            short_description: c.short_description.clone(),
            poster_path: c.poster_path.clone(),
            poster_url: c.poster_url.clone(),
            poster_url_preview: c.poster_url_preview.clone(),
            rating: c.rating,
            rating_kinopoisk: c.rating_kinopoisk,
            vote_average: c.vote_average,
            genres: c.genres.clone(),
            ..Default::default()
        }
    }
}

fn fill_str(dst: &mut String, src: &str) {
    if dst.trim().is_empty() && !src.trim().is_empty() {
        *dst = src.to_string();
    }
}

fn fill_f64(dst: &mut f64, src: f64) {
    if *dst == 0.0 && src != 0.0 {
        *dst = src;
    }
}

/// Заполняет только пустые поля. Название и описание переносятся группой
/// и только если пуста вся группа; остальное по одному полю.
fn fill_missing(dst: &mut Movie, src: &Movie) {
    if !dst.has_title() {
        dst.title = src.title.clone();
        dst.name_ru = src.name_ru.clone();
        dst.name = src.name.clone();
        dst.name_original = src.name_original.clone();
    }
    if !dst.has_overview() {
        dst.overview = src.overview.clone();
        dst.description = src.description.clone();
        dst.short_description = src.short_description.clone();
    }
    if dst.genres.is_empty() {
        dst.genres = src.genres.clone();
    }
    fill_f64(&mut dst.rating, src.rating);
    fill_f64(&mut dst.rating_kinopoisk, src.rating_kinopoisk);
    fill_f64(&mut dst.vote_average, src.vote_average);
    fill_str(&mut dst.year, &src.year);
    fill_str(&mut dst.release_date, &src.release_date);
    fill_str(&mut dst.external_ids.imdb, &src.external_ids.imdb);
    if dst.external_ids.kp == 0 {
        dst.external_ids.kp = src.external_ids.kp;
    }
    if dst.kinopoisk_id == 0 {
        dst.kinopoisk_id = src.kinopoisk_id;
    }
    fill_str(&mut dst.poster_path, &src.poster_path);
    fill_str(&mut dst.poster_url, &src.poster_url);
    fill_str(&mut dst.poster_url_preview, &src.poster_url_preview);
}
