use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Movie,
    Series,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Series => "series",
        }
    }
}

/// Запись библиотеки: фильм (одна или несколько частей) или сериал.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchItem {
    pub kp_id: u64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub storage_chat_id: i64,
    #[serde(default)]
    pub storage_message_id: i32,
    #[serde(default)]
    pub storage_message_ids: Vec<i32>,
    #[serde(default)]
    pub seasons: Vec<Season>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub number: u32,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

/// `storage_*`, `voice`, `quality`: старая схема с одной ссылкой.
/// При непустых `variants` они повторяют `variants[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub number: u32,
    #[serde(default)]
    pub storage_chat_id: i64,
    #[serde(default)]
    pub storage_message_id: i32,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub storage_chat_id: i64,
    pub storage_message_id: i32,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub quality: String,
}

impl Variant {
    pub fn new(chat: i64, message: i32, voice: &str, quality: &str) -> Self {
        Self {
            storage_chat_id: chat,
            storage_message_id: message,
            voice: voice.trim().to_string(),
            quality: quality.trim().to_string(),
        }
    }

    fn same_as(&self, other: &Variant) -> bool {
        self.storage_chat_id == other.storage_chat_id
            && self.storage_message_id == other.storage_message_id
            && eq_label(&self.voice, &other.voice)
            && eq_label(&self.quality, &other.quality)
    }
}

/// Ссылка на сообщение в канале-хранилище.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Сравнение меток без пробелов по краям и без регистра.
pub fn eq_label(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Фильтр по озвучке внутри сезона, см. [`Season::voice_filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceFilter {
    /// Метка есть в сезоне целиком: только точное совпадение без регистра.
    Exact(String),
    /// Целиком такой метки нет: в токен она попала обрезанной.
    Prefix(String),
    /// Вариант без названия озвучки.
    Unnamed,
}

impl VoiceFilter {
    pub fn matches(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        match self {
            VoiceFilter::Exact(w) => label == *w,
            VoiceFilter::Prefix(w) => label.starts_with(w.as_str()),
            VoiceFilter::Unnamed => label.is_empty(),
        }
    }
}

impl Episode {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            storage_chat_id: 0,
            storage_message_id: 0,
            voice: String::new(),
            quality: String::new(),
            variants: Vec::new(),
        }
    }

    /// Пересобрать старые поля из `variants[0]`.
    pub fn normalize(&mut self) {
        if let Some(first) = self.variants.first() {
            self.storage_chat_id = first.storage_chat_id;
            self.storage_message_id = first.storage_message_id;
            self.voice = first.voice.clone();
            self.quality = first.quality.clone();
        }
    }

    /// Единственная старая ссылка становится `variants[0]`.
    fn adopt_legacy(&mut self) {
        if self.variants.is_empty() && self.storage_chat_id != 0 && self.storage_message_id != 0 {
            self.variants.push(Variant::new(
                self.storage_chat_id,
                self.storage_message_id,
                &self.voice,
                &self.quality,
            ));
        }
    }

    /// `false`, если такой вариант уже есть.
    pub fn add_variant(&mut self, v: Variant) -> bool {
        self.adopt_legacy();
        let added = if self.variants.iter().any(|x| x.same_as(&v)) {
            false
        } else {
            self.variants.push(v);
            true
        };
        self.normalize();
        added
    }

    pub fn default_ref(&self) -> Option<StorageRef> {
        if self.storage_chat_id == 0 || self.storage_message_id <= 0 {
            return None;
        }
        Some(StorageRef {
            chat_id: self.storage_chat_id,
            message_id: self.storage_message_id,
        })
    }

    /// Вариант под фильтр; если ничего не подошло, то основная ссылка эпизода.
    pub fn pick_ref(&self, filter: Option<&VoiceFilter>) -> Option<StorageRef> {
        if let Some(filter) = filter {
            if let Some(v) = self.variants.iter().find(|v| filter.matches(&v.voice)) {
                if v.storage_chat_id != 0 && v.storage_message_id > 0 {
                    return Some(StorageRef {
                        chat_id: v.storage_chat_id,
                        message_id: v.storage_message_id,
                    });
                }
            }
        }
        self.default_ref()
    }

    /// Озвучки эпизода; у эпизода без вариантов берётся legacy-поле.
    pub fn voices(&self) -> Vec<&str> {
        if self.variants.is_empty() {
            let v = self.voice.trim();
            return if v.is_empty() { vec![] } else { vec![v] };
        }
        self.variants
            .iter()
            .map(|v| v.voice.trim())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

impl Season {
    /// Фильтр под метку из токена. Пустая метка: вариант без названия.
    /// Префикс включается только если целиком такой озвучки в сезоне нет.
    pub fn voice_filter(&self, wanted: &str) -> VoiceFilter {
        let wanted = wanted.trim().to_lowercase();
        if wanted.is_empty() {
            return VoiceFilter::Unnamed;
        }
        let exact = self
            .episodes
            .iter()
            .flat_map(|ep| ep.voices())
            .any(|v| eq_label(v, &wanted));
        if exact {
            VoiceFilter::Exact(wanted)
        } else {
            VoiceFilter::Prefix(wanted)
        }
    }

    pub fn episode(&self, number: u32) -> Option<(usize, &Episode)> {
        self.episodes
            .iter()
            .enumerate()
            .find(|(_, e)| e.number == number)
    }
}

impl WatchItem {
    pub fn new(kp_id: u64, kind: ItemKind) -> Self {
        Self {
            kp_id,
            kind,
            title: String::new(),
            voice: String::new(),
            quality: String::new(),
            storage_chat_id: 0,
            storage_message_id: 0,
            storage_message_ids: Vec::new(),
            seasons: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn season(&self, number: u32) -> Option<&Season> {
        self.seasons.iter().find(|s| s.number == number)
    }

    /// Заголовок для показа: сохранённое название или `id_<kp_id>`.
    pub fn display_title(&self) -> String {
        let t = self.title.trim();
        if t.is_empty() {
            format!("id_{}", self.kp_id)
        } else {
            t.to_string()
        }
    }

    /// Части фильма по возрастанию id сообщения.
    pub fn movie_message_ids(&self) -> Vec<i32> {
        if !self.storage_message_ids.is_empty() {
            let mut ids = self.storage_message_ids.clone();
            ids.sort_unstable();
            return ids;
        }
        if self.storage_message_id > 0 {
            return vec![self.storage_message_id];
        }
        vec![]
    }

    pub fn episodes_count(&self) -> usize {
        self.seasons.iter().map(|s| s.episodes.len()).sum()
    }

    /// Заменить набор частей фильма; первый id становится основным.
    pub fn set_movie(&mut self, voice: &str, quality: &str, chat: i64, message_ids: &[i32]) {
        self.kind = ItemKind::Movie;
        self.seasons.clear();
        self.voice = voice.trim().to_string();
        self.quality = quality.trim().to_string();
        self.storage_chat_id = chat;
        self.storage_message_id = message_ids.first().copied().unwrap_or(0);
        self.storage_message_ids = message_ids.to_vec();
        self.touch();
    }

    /// Добавить части к фильму: без дублей, по возрастанию, основной: наименьший id.
    pub fn merge_movie_parts(&mut self, chat: i64, message_ids: &[i32]) -> Result<()> {
        if self.kind != ItemKind::Movie {
            return Err(Error::TypeMismatch { id: self.kp_id });
        }
        if self.storage_chat_id != 0 && self.storage_chat_id != chat {
            return Err(Error::ChatMismatch {
                id: self.kp_id,
                expected: self.storage_chat_id,
                got: chat,
            });
        }
        let merged: BTreeSet<i32> = self
            .storage_message_ids
            .iter()
            .chain(std::iter::once(&self.storage_message_id))
            .chain(message_ids.iter())
            .copied()
            .filter(|&id| id > 0)
            .collect();
        self.storage_chat_id = chat;
        self.storage_message_ids = merged.into_iter().collect();
        if let Some(&first) = self.storage_message_ids.first() {
            self.storage_message_id = first;
        }
        self.touch();
        Ok(())
    }

    /// Найти или создать сезон и эпизод (оба по порядку) и добавить вариант.
    /// `false`, если вариант уже был.
    pub fn upsert_episode(&mut self, season: u32, episode: u32, v: Variant) -> bool {
        self.kind = ItemKind::Series;
        let s_idx = match self.seasons.iter().position(|s| s.number == season) {
            Some(i) => i,
            None => {
                self.seasons.push(Season {
                    number: season,
                    episodes: Vec::new(),
                });
                self.seasons.len() - 1
            }
        };
        let eps = &mut self.seasons[s_idx].episodes;
        let e_idx = match eps.iter().position(|e| e.number == episode) {
            Some(i) => i,
            None => {
                eps.push(Episode::new(episode));
                eps.len() - 1
            }
        };
        let added = eps[e_idx].add_variant(v);
        eps.sort_by_key(|e| e.number);
        self.seasons.sort_by_key(|s| s.number);
        self.touch();
        added
    }

    /// `true`, если что-то удалено.
    pub fn remove_episode(&mut self, season: u32, episode: u32) -> bool {
        let Some(s) = self.seasons.iter_mut().find(|s| s.number == season) else {
            return false;
        };
        let before = s.episodes.len();
        s.episodes.retain(|e| e.number != episode);
        let removed = s.episodes.len() < before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn remove_season(&mut self, season: u32) -> bool {
        let before = self.seasons.len();
        self.seasons.retain(|s| s.number != season);
        let removed = self.seasons.len() < before;
        if removed {
            self.touch();
        }
        removed
    }
}
