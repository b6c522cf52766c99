use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::llm::client::types::ModelRequest;

const INFERENCE_CATEGORY: &str = "inference";

/// 推理响应缓存管理器
#[derive(Clone)]
pub struct CacheManager {
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
}

/// 缓存条目
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    /// 产生该响应的后端名称
    pub backend: String,
    pub model_id: String,
    pub timestamp: u64,
    /// 请求的MD5哈希值
    pub request_hash: String,
}

/// 缓存指标
#[derive(Default)]
pub struct CacheMetrics {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub cache_writes: AtomicUsize,
    pub cache_errors: AtomicUsize,
}

/// 缓存统计报告
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheReport {
    pub hit_rate: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_writes: usize,
    pub cache_errors: usize,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// 生成请求的MD5哈希，覆盖模型、消息、温度和输出长度
    pub fn hash_request(&self, request: &ModelRequest) -> String {
        let mut hasher = Md5::new();
        hasher.update(request.model_id.as_bytes());
        for message in &request.messages {
            hasher.update(format!("{:?}", message.role).as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(request.temperature.to_bits().to_le_bytes());
        hasher.update(request.max_tokens.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get_cache_path(&self, hash: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(INFERENCE_CATEGORY)
            .join(format!("{}.json", hash))
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default()
    }

    fn is_expired(&self, timestamp: u64) -> bool {
        let expire_seconds = self.config.expire_hours * 3600;
        Self::now_secs().saturating_sub(timestamp) > expire_seconds
    }

    /// 读取缓存，任何读取错误都按未命中处理
    pub async fn get(&self, request: &ModelRequest) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }

        let hash = self.hash_request(request);
        let cache_path = self.get_cache_path(&hash);

        if !cache_path.exists() {
            self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let content = match fs::read_to_string(&cache_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("读取缓存文件失败 {}: {}", cache_path.display(), e);
                self.metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if self.is_expired(entry.timestamp) => {
                let _ = fs::remove_file(&cache_path).await;
                self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(entry) => {
                debug!("Cache hit for {} ({})", entry.model_id, hash);
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Err(e) => {
                warn!("缓存反序列化失败 {}: {}", cache_path.display(), e);
                self.metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 写入缓存
    pub async fn set(&self, request: &ModelRequest, text: &str, backend: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let hash = self.hash_request(request);
        let cache_path = self.get_cache_path(&hash);

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry {
            text: text.to_string(),
            backend: backend.to_string(),
            model_id: request.model_id.clone(),
            timestamp: Self::now_secs(),
            request_hash: hash,
        };

        let write_result = match serde_json::to_string_pretty(&entry) {
            Ok(content) => fs::write(&cache_path, content).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        match write_result {
            Ok(()) => {
                self.metrics.cache_writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn report(&self) -> CacheReport {
        let cache_hits = self.metrics.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.metrics.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        CacheReport {
            hit_rate: if lookups > 0 {
                cache_hits as f64 / lookups as f64
            } else {
                0.0
            },
            cache_hits,
            cache_misses,
            cache_writes: self.metrics.cache_writes.load(Ordering::Relaxed),
            cache_errors: self.metrics.cache_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests;
