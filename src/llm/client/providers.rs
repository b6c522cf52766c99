//! 推理后端支持模块

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::client::types::{InferenceError, ModelRequest};
use crate::llm::client::utils::{
    build_cloud_body, extract_cloud_content, is_model_installed, preview, resolve_local_model,
};

/// 一个推理服务目标
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &ModelRequest) -> Result<String, InferenceError>;
}

/// 云端推理后端，仅对429做退避重试
#[derive(Clone)]
pub struct CloudBackend {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    backoff: Duration,
}

impl CloudBackend {
    pub const NAME: &'static str = "cloud";

    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_retries,
            backoff,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn endpoint(&self, model_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), model_id)
    }
}

#[async_trait]
impl InferenceBackend for CloudBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, InferenceError> {
        if !self.is_configured() {
            return Err(InferenceError::NotConfigured { backend: Self::NAME });
        }

        let url = self.endpoint(&request.model_id);
        let body = build_cloud_body(request);

        for attempt in 0..=self.max_retries {
            debug!("Calling cloud inference: {} (attempt {})", url, attempt + 1);

            let response = self
                .client
                .post(&url)
                .header(header::AUTHORIZATION, &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|source| InferenceError::Transport {
                    backend: Self::NAME,
                    source,
                })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < self.max_retries {
                    let wait = self.backoff * (attempt + 1);
                    warn!("☁️ 云端推理被限流(429)，{:?}后重试...", wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                return Err(InferenceError::RateLimited {
                    backend: Self::NAME,
                    attempts: attempt + 1,
                });
            }

            if status != StatusCode::OK {
                let text = response.text().await.unwrap_or_default();
                return Err(InferenceError::Http {
                    backend: Self::NAME,
                    status: status.as_u16(),
                    body: preview(&text, 300),
                });
            }

            let data: Value =
                response
                    .json()
                    .await
                    .map_err(|e| InferenceError::InvalidPayload {
                        backend: Self::NAME,
                        detail: e.to_string(),
                    })?;

            return match extract_cloud_content(&data) {
                Some(content) => {
                    debug!("Got cloud content: {}", preview(&content, 100));
                    Ok(content)
                }
                None => Err(InferenceError::InvalidPayload {
                    backend: Self::NAME,
                    detail: preview(&data.to_string(), 200),
                }),
            };
        }

        Err(InferenceError::RateLimited {
            backend: Self::NAME,
            attempts: self.max_retries + 1,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LocalTagsResponse {
    #[serde(default)]
    models: Vec<LocalModelTag>,
}

#[derive(Debug, Deserialize)]
struct LocalModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    #[serde(default)]
    message: Option<LocalChatMessage>,
}

#[derive(Debug, Deserialize)]
struct LocalChatMessage {
    #[serde(default)]
    content: String,
}

/// 本地推理后端（Ollama协议）
#[derive(Clone)]
pub struct LocalBackend {
    client: Client,
    base_url: String,
    probe_timeout: Duration,
}

impl LocalBackend {
    pub const NAME: &'static str = "local";

    pub fn new(client: Client, base_url: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            probe_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// 探测本地服务并列出已安装的模型
    pub async fn installed_models(&self) -> Result<Vec<String>, InferenceError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|_| InferenceError::BackendUnavailable {
                backend: Self::NAME,
            })?;

        if !response.status().is_success() {
            return Err(InferenceError::BackendUnavailable {
                backend: Self::NAME,
            });
        }

        let tags: LocalTagsResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::InvalidPayload {
                    backend: Self::NAME,
                    detail: e.to_string(),
                })?;

        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, InferenceError> {
        let local_model = resolve_local_model(&request.model_id);
        let installed = self.installed_models().await?;

        if !is_model_installed(local_model, &installed) {
            return Err(InferenceError::ModelUnavailable {
                backend: Self::NAME,
                model: local_model.to_string(),
            });
        }

        info!("🖥️ 使用本地模型: {}", local_model);
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&json!({
                "model": local_model,
                "messages": request.messages,
                "stream": false,
                "options": {
                    "temperature": request.temperature,
                    "num_predict": request.max_tokens,
                },
            }))
            .send()
            .await
            .map_err(|source| InferenceError::Transport {
                backend: Self::NAME,
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                backend: Self::NAME,
                status: status.as_u16(),
                body: preview(&text, 300),
            });
        }

        let chat: LocalChatResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::InvalidPayload {
                    backend: Self::NAME,
                    detail: e.to_string(),
                })?;

        chat.message
            .map(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| InferenceError::InvalidPayload {
                backend: Self::NAME,
                detail: "empty message content".to_string(),
            })
    }
}
