use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// 带角色标签的对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// 一次模型调用的完整请求，调用期间不可变
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(
        model_id: impl Into<String>,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            temperature,
            max_tokens,
        }
    }

    /// 最后一条用户消息的内容
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.as_str())
    }
}

/// 一次成功生成的结果及其来源后端
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub backend: &'static str,
}

/// 推理后端错误，只在推理层内部流转，不会越过InferenceClient
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{backend} is not configured")]
    NotConfigured { backend: &'static str },

    #[error("{backend} is not reachable")]
    BackendUnavailable { backend: &'static str },

    #[error("{backend} rate limited the request after {attempts} attempts")]
    RateLimited { backend: &'static str, attempts: u32 },

    #[error("{backend} returned HTTP {status}: {body}")]
    Http {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend} transport error: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned an unexpected payload: {detail}")]
    InvalidPayload {
        backend: &'static str,
        detail: String,
    },

    #[error("model '{model}' is not installed on {backend}")]
    ModelUnavailable { backend: &'static str, model: String },
}
