//! 推理客户端 - 依次尝试云端、本地后端，最终回落到确定性模拟响应

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::config::{CacheConfig, InferenceConfig};

pub mod mock;
pub mod providers;
pub mod types;
pub mod utils;

pub use mock::MockBackend;
pub use providers::{CloudBackend, InferenceBackend, LocalBackend};
pub use types::{ChatMessage, Generation, InferenceError, MessageRole, ModelRequest};

/// 推理客户端，调用方只需区分内容，不需要处理失败
#[derive(Clone)]
pub struct InferenceClient {
    backends: Vec<Arc<dyn InferenceBackend>>,
    fallback: MockBackend,
    cache: Option<CacheManager>,
}

impl InferenceClient {
    /// 根据配置创建客户端：云端 → 本地 → 模拟
    pub fn new(config: &InferenceConfig, cache_config: &CacheConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let cloud = CloudBackend::new(
            http.clone(),
            config.cloud_api_base_url.clone(),
            config.cloud_api_key.clone(),
            config.rate_limit_retries,
            Duration::from_secs(config.rate_limit_backoff_seconds),
        );
        let local = LocalBackend::new(
            http,
            config.local_api_base_url.clone(),
            Duration::from_secs(config.local_probe_timeout_seconds),
        );

        let mut backends: Vec<Arc<dyn InferenceBackend>> = Vec::new();
        if cloud.is_configured() {
            backends.push(Arc::new(cloud));
        } else {
            debug!("Cloud API key not configured, skipping cloud backend");
        }
        backends.push(Arc::new(local));

        let client = Self::with_backends(backends);
        Ok(if cache_config.enabled {
            client.with_cache(CacheManager::new(cache_config.clone()))
        } else {
            client
        })
    }

    /// 使用给定的后端列表创建客户端，列表为空时只剩模拟响应
    pub fn with_backends(backends: Vec<Arc<dyn InferenceBackend>>) -> Self {
        Self {
            backends,
            fallback: MockBackend,
            cache: None,
        }
    }

    /// 只使用模拟响应的客户端
    pub fn mock_only() -> Self {
        Self::with_backends(Vec::new())
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// 生成文本，永不返回空字符串
    pub async fn generate(
        &self,
        model_id: &str,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: u32,
    ) -> String {
        let request = ModelRequest::new(model_id, messages, temperature, max_tokens);
        self.generate_request(&request).await.text
    }

    /// 生成文本并返回产生结果的后端名称
    pub async fn generate_request(&self, request: &ModelRequest) -> Generation {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(request).await {
                if !entry.text.trim().is_empty() {
                    return Generation {
                        text: entry.text,
                        backend: self.backend_label(&entry.backend),
                    };
                }
            }
        }

        for backend in &self.backends {
            match backend.generate(request).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("{} backend answered for {}", backend.name(), request.model_id);
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.set(request, &text, backend.name()).await {
                            warn!("写入推理缓存失败: {}", e);
                        }
                    }
                    return Generation {
                        text,
                        backend: backend.name(),
                    };
                }
                Ok(_) => {
                    warn!("⚠️ {} 返回了空响应，尝试下一个后端", backend.name());
                }
                Err(e) => {
                    warn!("⚠️ {} 推理失败，尝试下一个后端: {}", backend.name(), e);
                }
            }
        }

        warn!(
            "⚠️ 所有推理后端均不可用，使用模拟响应 ({})",
            request.model_id
        );
        Generation {
            text: self.fallback.respond(request),
            backend: MockBackend::NAME,
        }
    }

    fn backend_label(&self, name: &str) -> &'static str {
        self.backends
            .iter()
            .map(|backend| backend.name())
            .find(|backend| *backend == name)
            .unwrap_or("cache")
    }
}

#[cfg(test)]
mod tests;
