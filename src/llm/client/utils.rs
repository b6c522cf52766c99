use serde_json::{Value, json};

use crate::llm::client::types::{ChatMessage, MessageRole, ModelRequest};

/// 支持对话消息格式的模型关键词
pub const CHAT_MODEL_KEYWORDS: &[&str] = &[
    "instruct", "chat", "llama", "qwen", "mistral", "gemma", "phi", "deepseek",
];

/// 云端模型ID到本地模型名称的映射表，按顺序匹配，先命中者生效
pub const LOCAL_MODEL_TABLE: &[(&str, &str)] = &[
    ("codellama", "codellama:7b"),
    ("qwen", "qwen2.5-coder:7b"),
    ("llama", "llama3.2:3b"),
    ("starcoder", "qwen2.5-coder:7b"),
    ("deepseek", "deepseek-coder:6.7b"),
    ("mistral", "mistral:7b"),
    ("phi", "phi3:mini"),
    ("gemma", "gemma2:2b"),
];

/// 没有任何关键词命中时使用的本地模型
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2:3b";

/// 判断模型是否接受对话消息格式
pub fn is_chat_model(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    CHAT_MODEL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// 将云端模型ID解析为最接近的本地模型名称
pub fn resolve_local_model(model_id: &str) -> &'static str {
    let lower = model_id.to_lowercase();
    LOCAL_MODEL_TABLE
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, local_name)| *local_name)
        .unwrap_or(DEFAULT_LOCAL_MODEL)
}

/// 本地模型是否已安装（精确匹配或被已安装名称包含）
pub fn is_model_installed(model: &str, installed: &[String]) -> bool {
    installed
        .iter()
        .any(|name| name == model || name.contains(model))
}

/// 非对话模型使用的拼接提示词
pub fn build_text_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| match message.role {
            MessageRole::System => format!("Instructions: {}", message.content),
            _ => message.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 根据模型类型构造云端请求体
pub fn build_cloud_body(request: &ModelRequest) -> Value {
    let params = json!({
        "max_new_tokens": request.max_tokens,
        "temperature": request.temperature,
    });

    if is_chat_model(&request.model_id) {
        json!({ "messages": request.messages, "params": params })
    } else {
        json!({ "text": build_text_prompt(&request.messages), "params": params })
    }
}

/// 从云端响应中取出生成文本
pub fn extract_cloud_content(data: &Value) -> Option<String> {
    if !data.get("error").is_none_or(Value::is_null) {
        return None;
    }

    match data.get("output") {
        Some(Value::Object(output)) => output
            .get("content")
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .map(str::to_string),
        Some(Value::String(output)) if !output.trim().is_empty() => Some(output.clone()),
        _ => None,
    }
}

/// 截断日志中的长文本
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
