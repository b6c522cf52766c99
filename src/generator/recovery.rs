//! 从带噪声的模型文本中恢复JSON对象
//!
//! 每种恢复策略都是 `&str -> Option<Value>` 的纯函数，按顺序尝试，先成功者生效。
//! 只接受JSON对象，数组或标量一律视为失败。

use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::debug;

use crate::generator::mermaid::{self, MERMAID_KEYWORDS};

pub type RecoveryStrategy = fn(&str) -> Option<Value>;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid json fence regex"));
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("valid fence regex"));
static BRACE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid brace regex"));
static WRITER_DOCSTRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"docstring"\s*:\s*(?:"""(.*?)"""|"((?:[^"\\]|\\.)*)"|```(.*?)```)"#)
        .expect("valid docstring regex")
});
static WRITER_MARKDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"markdown"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid markdown regex")
});

/// 有序的恢复策略链
#[derive(Clone, Copy)]
pub struct OutputRecovery {
    name: &'static str,
    strategies: &'static [RecoveryStrategy],
}

/// 通用策略链：直接解析 → 代码块 → 大括号片段
pub const STANDARD_RECOVERY: OutputRecovery = OutputRecovery {
    name: "standard",
    strategies: &[parse_direct, parse_fenced, parse_brace_span],
};

/// Writer策略链：每一步失败后，先把三引号折叠为普通引号再试一次
pub const WRITER_RECOVERY: OutputRecovery = OutputRecovery {
    name: "writer",
    strategies: &[
        parse_direct,
        parse_direct_collapsed,
        parse_fenced,
        parse_fenced_collapsed,
        parse_brace_span,
        parse_brace_span_collapsed,
    ],
};

/// Diagram策略链：末尾允许把裸Mermaid文本包装成记录
pub const DIAGRAM_RECOVERY: OutputRecovery = OutputRecovery {
    name: "diagram",
    strategies: &[parse_direct, parse_fenced, parse_brace_span, wrap_raw_mermaid],
};

impl OutputRecovery {
    pub fn extract(&self, raw: &str) -> Option<Value> {
        let found = self
            .strategies
            .iter()
            .enumerate()
            .find_map(|(index, strategy)| strategy(raw).map(|value| (index, value)));

        match found {
            Some((index, value)) => {
                debug!("{} recovery succeeded with strategy #{}", self.name, index + 1);
                Some(value)
            }
            None => None,
        }
    }
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn collapse_triple_quotes(text: &str) -> Option<String> {
    text.contains("\"\"\"")
        .then(|| text.replace("\"\"\"", "\""))
}

pub fn parse_direct(raw: &str) -> Option<Value> {
    parse_object(raw)
}

pub fn parse_fenced(raw: &str) -> Option<Value> {
    [&*JSON_FENCE, &*ANY_FENCE].iter().find_map(|fence| {
        fence
            .captures(raw)
            .and_then(|captures| captures.get(1))
            .and_then(|inner| parse_object(inner.as_str()))
    })
}

pub fn parse_brace_span(raw: &str) -> Option<Value> {
    BRACE_SPAN
        .find(raw)
        .and_then(|span| parse_object(span.as_str()))
}

fn parse_direct_collapsed(raw: &str) -> Option<Value> {
    collapse_triple_quotes(raw).and_then(|text| parse_direct(&text))
}

fn parse_fenced_collapsed(raw: &str) -> Option<Value> {
    collapse_triple_quotes(raw).and_then(|text| parse_fenced(&text))
}

fn parse_brace_span_collapsed(raw: &str) -> Option<Value> {
    collapse_triple_quotes(raw).and_then(|text| parse_brace_span(&text))
}

/// 清洗后的首个非空行以图表关键字开头时，把原文包装成图表记录
pub fn wrap_raw_mermaid(raw: &str) -> Option<Value> {
    let clean = mermaid::clean(raw);
    let first_line = clean
        .lines()
        .find(|line| !line.trim().is_empty())?
        .trim()
        .to_lowercase();

    if !MERMAID_KEYWORDS
        .iter()
        .any(|keyword| first_line.starts_with(keyword))
    {
        return None;
    }

    let diagram_type = first_line
        .split_whitespace()
        .next()
        .unwrap_or("flowchart")
        .to_string();

    Some(json!({
        "diagram_type": diagram_type,
        "mermaid_code": clean,
        "description": "Auto-extracted diagram",
    }))
}

/// 所有解析都失败时，按字段逐个提取Writer的docstring和markdown
pub fn salvage_writer_fields(raw: &str) -> Option<Value> {
    let docstring = WRITER_DOCSTRING.captures(raw).map(|captures| {
        (1..=3)
            .find_map(|group| captures.get(group))
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_default()
    });
    let markdown = WRITER_MARKDOWN
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|matched| matched.as_str().to_string());

    if docstring.is_none() && markdown.is_none() {
        return None;
    }

    let docstring = docstring.unwrap_or_default();
    Some(json!({
        "docstring": if docstring.is_empty() {
            String::new()
        } else {
            format!("\"\"\"\n{}\n\"\"\"", docstring)
        },
        "markdown": markdown.unwrap_or_default(),
        "examples": [],
    }))
}
