use std::time::{Duration, Instant};

use moka::{future::Cache, Expiry};

use crate::neomovies::{Genre, Movie};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_ENTRIES: u64 = 10_000;

/// Поля из выдачи поиска, которые потом добирают пробелы в карточке.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedMovie {
    pub title: String,
    pub year: String,
    pub overview: String,
    pub description: String,
    pub short_description: String,
    pub poster_path: String,
    pub poster_url: String,
    pub poster_url_preview: String,
    pub rating: f64,
    pub rating_kinopoisk: f64,
    pub vote_average: f64,
    pub genres: Vec<Genre>,
}

impl From<&Movie> for CachedMovie {
    fn from(m: &Movie) -> Self {
        Self {
            title: m.display_name().unwrap_or_default().to_string(),
            year: m.year.clone(),
            overview: m.overview.clone(),
            description: m.description.clone(),
            short_description: m.short_description.clone(),
            poster_path: m.poster_path.clone(),
            poster_url: m.poster_url.clone(),
            poster_url_preview: m.poster_url_preview.clone(),
            rating: m.rating,
            rating_kinopoisk: m.rating_kinopoisk,
            vote_average: m.vote_average,
            genres: m.genres.clone(),
        }
    }
}

#[derive(Clone)]
struct Entry {
    movie: CachedMovie,
    ttl: Duration,
}

/// TTL у каждой записи свой; перезапись отсчитывает заново.
struct EntryExpiry;

impl Expiry<u64, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &u64, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &u64,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Процессный кэш результатов инлайн-поиска: kp id → поля фильма.
/// Клонируется дёшево, все клоны смотрят в одно хранилище.
#[derive(Clone)]
pub struct InlineCache {
    inner: Cache<u64, Entry>,
    default_ttl: Duration,
}

impl InlineCache {
    pub fn new(default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .expire_after(EntryExpiry)
            .build();
        Self { inner, default_ttl }
    }

    pub async fn get(&self, kp_id: u64) -> Option<CachedMovie> {
        if kp_id == 0 {
            return None;
        }
        self.inner.get(&kp_id).await.map(|e| e.movie)
    }

    /// Нулевой `ttl`: берётся TTL кэша по умолчанию.
    pub async fn set(&self, kp_id: u64, movie: CachedMovie, ttl: Duration) {
        if kp_id == 0 {
            return;
        }
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        self.inner.insert(kp_id, Entry { movie, ttl }).await;
    }

    pub async fn set_default(&self, kp_id: u64, movie: CachedMovie) {
        self.set(kp_id, movie, self.default_ttl).await;
    }
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
