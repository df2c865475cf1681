use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::error::{Error, Result};
use crate::watch::{ItemKind, Variant, WatchItem};

pub const LIST_DEFAULT: usize = 20;
pub const LIST_MAX: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileState {
    version: u32,
    // kp_id -> документ
    items: HashMap<u64, WatchItem>,
}

/// Документное хранилище библиотеки: снапшот в JSON-файле.
///
/// Запись: документ копируется из лока, меняется снаружи и кладётся целиком.
/// Параллельные записи в один id: побеждает последняя.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<FileState>>,
    // один писатель файла за раз: tmp-файл общий
    flush_lock: Arc<Mutex<()>>,
    path: PathBuf,
}

impl Storage {
    pub async fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = if fs::try_exists(&path).await.unwrap_or(false) {
            let data = fs::read(&path).await?;
            match serde_json::from_slice::<FileState>(&data) {
                Ok(mut s) => { if s.version == 0 { s.version = 1; } s }
                Err(e) => {
                    warn!(path = ?path, error = %e, "store snapshot unreadable, starting empty");
                    FileState { version: 1, ..Default::default() }
                }
            }
        } else {
            FileState { version: 1, ..Default::default() }
        };
        Ok(Self {
            inner: Arc::new(RwLock::new(state)),
            flush_lock: Arc::new(Mutex::new(())),
            path,
        })
    }

    pub async fn get(&self, kp_id: u64) -> Option<WatchItem> {
        let guard = self.inner.read().await;
        guard.items.get(&kp_id).cloned()
    }

    /// Создать или полностью заменить набор частей фильма.
    pub async fn upsert_movie(
        &self,
        kp_id: u64,
        voice: &str,
        quality: &str,
        chat_id: i64,
        message_ids: &[i32],
    ) -> Result<()> {
        let mut item = self
            .get(kp_id)
            .await
            .unwrap_or_else(|| WatchItem::new(kp_id, ItemKind::Movie));
        item.set_movie(voice, quality, chat_id, message_ids);
        self.put(item).await
    }

    /// Дописать части к существующему фильму. При ошибке ничего не пишется.
    pub async fn append_movie_parts(&self, kp_id: u64, chat_id: i64, message_ids: &[i32]) -> Result<()> {
        let mut item = self
            .get(kp_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("kp_id {kp_id}")))?;
        item.merge_movie_parts(chat_id, message_ids)?;
        self.put(item).await
    }

    pub async fn upsert_series(&self, kp_id: u64, title: &str) -> Result<()> {
        let mut item = self
            .get(kp_id)
            .await
            .unwrap_or_else(|| WatchItem::new(kp_id, ItemKind::Series));
        item.kind = ItemKind::Series;
        item.title = title.trim().to_string();
        item.touch();
        self.put(item).await
    }

    /// `false`, если такой вариант уже был.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_series_episode(
        &self,
        kp_id: u64,
        season: u32,
        episode: u32,
        voice: &str,
        quality: &str,
        chat_id: i64,
        message_id: i32,
    ) -> Result<bool> {
        let mut item = self
            .get(kp_id)
            .await
            .unwrap_or_else(|| WatchItem::new(kp_id, ItemKind::Series));
        let added = item.upsert_episode(season, episode, Variant::new(chat_id, message_id, voice, quality));
        self.put(item).await?;
        Ok(added)
    }

    pub async fn delete_episode(&self, kp_id: u64, season: u32, episode: u32) -> Result<bool> {
        let Some(mut item) = self.get(kp_id).await else { return Ok(false); };
        if !item.remove_episode(season, episode) {
            return Ok(false);
        }
        self.put(item).await?;
        Ok(true)
    }

    pub async fn delete_season(&self, kp_id: u64, season: u32) -> Result<bool> {
        let Some(mut item) = self.get(kp_id).await else { return Ok(false); };
        if !item.remove_season(season) {
            return Ok(false);
        }
        self.put(item).await?;
        Ok(true)
    }

    pub async fn delete(&self, kp_id: u64) -> Result<bool> {
        let removed = {
            let mut guard = self.inner.write().await;
            guard.items.remove(&kp_id).is_some()
        };
        if removed { self.flush().await?; }
        Ok(removed)
    }

    /// Последние обновлённые. `limit` 0 или больше 50 заменяется на 20.
    pub async fn list_recent(&self, limit: usize) -> Vec<WatchItem> {
        let limit = if limit == 0 || limit > LIST_MAX { LIST_DEFAULT } else { limit };
        let guard = self.inner.read().await;
        let mut items: Vec<WatchItem> = guard.items.values().cloned().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.kp_id.cmp(&b.kp_id)));
        items.truncate(limit);
        items
    }

    async fn put(&self, item: WatchItem) -> Result<()> {
        // 1) обновляем память
        {
            let mut guard = self.inner.write().await;
            guard.items.insert(item.kp_id, item);
        }
        // 2) атомарная запись снапшота
        self.flush().await
    }

    async fn flush(&self) -> Result<()> {
        let _writer = self.flush_lock.lock().await;
        // снапшот берём уже под flush-локом, иначе более старый может лечь поверх нового
        let snapshot = {
            let guard = self.inner.read().await;
            serde_json::to_vec_pretty(&*guard).map_err(anyhow::Error::from)?
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &snapshot).await.map_err(anyhow::Error::from)?;
        fs::rename(&tmp, &self.path).await.map_err(anyhow::Error::from)?;
        Ok(())
    }
}
