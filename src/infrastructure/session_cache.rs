//! 会话缓存 - 基础设施层
//!
//! 按站点域名保存通过验证后的浏览器会话（cookie 等），带固定 TTL。

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{AppResult, FileError};

/// 单个域名的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCacheEntry {
    pub domain: String,
    /// 浏览器导出的会话状态（不透明字符串）
    pub state: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 进程内共享的会话缓存
///
/// 过期条目不会被返回，读取时顺便删除。
pub struct SessionCache {
    entries: DashMap<String, SessionCacheEntry>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, domain: &str) -> Option<SessionCacheEntry> {
        self.get_at(domain, Utc::now())
    }

    pub fn get_at(&self, domain: &str, now: DateTime<Utc>) -> Option<SessionCacheEntry> {
        let key = normalize(domain);
        let entry = self.entries.get(&key).map(|e| e.value().clone())?;
        if entry.is_expired(now) {
            self.entries
                .remove_if(&key, |_, current| current.is_expired(now));
            return None;
        }
        Some(entry)
    }

    /// 写入或覆盖某个域名的会话
    pub fn put(&self, domain: &str, state: impl Into<String>) -> SessionCacheEntry {
        self.put_at(domain, state, Utc::now())
    }

    pub fn put_at(
        &self,
        domain: &str,
        state: impl Into<String>,
        now: DateTime<Utc>,
    ) -> SessionCacheEntry {
        let key = normalize(domain);
        let entry = SessionCacheEntry {
            domain: key.clone(),
            state: state.into(),
            cached_at: now,
            expires_at: now + self.ttl,
        };
        self.entries.insert(key, entry.clone());
        entry
    }

    pub fn invalidate(&self, domain: &str) {
        self.entries.remove(&normalize(domain));
    }

    /// 删除所有过期条目，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从 JSON 文件恢复（文件不存在时为空缓存）
    pub async fn load(path: &Path, ttl: Duration) -> AppResult<Self> {
        let cache = Self::new(ttl);
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(cache);
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| FileError::ReadFailed {
                path: path.display().to_string(),
                source,
            })?;
        let entries: Vec<SessionCacheEntry> = serde_json::from_str(&content)?;
        let now = Utc::now();
        for entry in entries.into_iter().filter(|e| !e.is_expired(now)) {
            cache.entries.insert(entry.domain.clone(), entry);
        }
        tracing::info!("🍪 已恢复 {} 个站点会话", cache.len());
        Ok(cache)
    }

    /// 保存未过期条目到 JSON 文件
    pub async fn save(&self, path: &Path) -> AppResult<()> {
        let now = Utc::now();
        let entries: Vec<SessionCacheEntry> = self
            .entries
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| !e.is_expired(now))
            .collect();
        let content = serde_json::to_string_pretty(&entries)?;
        fs::write(path, content)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: path.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

fn normalize(domain: &str) -> String {
    domain.trim().trim_start_matches("www.").to_lowercase()
}
