//! Mermaid图表文本的清洗、启发式校验与修复

use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

/// 可识别的图表类型关键字（小写）
pub const MERMAID_KEYWORDS: &[&str] = &[
    "graph",
    "flowchart",
    "sequencediagram",
    "classdiagram",
    "statediagram",
    "statediagram-v2",
    "erdiagram",
    "gantt",
    "pie",
    "gitgraph",
    "mindmap",
    "timeline",
    "journey",
];

/// 缺少图表类型时补上的默认头
pub const DEFAULT_DIAGRAM_HEADER: &str = "flowchart TD";

const BRACKET_PAIRS: &[(char, char, &str)] = &[
    ('(', ')', "parentheses"),
    ('[', ']', "square brackets"),
    ('{', '}', "braces"),
];

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:mermaid)?\s*\n?").expect("valid leading fence regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?```\s*$").expect("valid trailing fence regex"));
static UNICODE_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("valid unicode escape regex"));
static DANGLING_ARROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-->|->>?|==>|-\.->)\s*$").expect("valid arrow regex"));

/// 校验发现的问题
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxIssue {
    #[error("Empty diagram code")]
    Empty,

    #[error("Unrecognized diagram type in first line: '{first_line}'")]
    UnknownDiagramType { first_line: String },

    #[error("Unbalanced {name}: {open} opening vs {close} closing")]
    Unbalanced {
        name: &'static str,
        open: usize,
        close: usize,
    },

    #[error("Dangling arrow without target: '{line}'")]
    DanglingArrow { line: String },
}

fn clean_once(raw: &str) -> String {
    let code = LEADING_FENCE.replace(raw, "");
    let code = TRAILING_FENCE.replace(&code, "");

    let code = code
        .replace("\\\\n", "\n")
        .replace("\\\\t", "  ")
        .replace("\\\\\"", "\"")
        .replace("\\n", "\n")
        .replace("\\t", "  ")
        .replace("\\\"", "\"");

    let code = UNICODE_ESCAPE.replace_all(&code, |captures: &Captures| {
        u32::from_str_radix(&captures[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| captures[0].to_string())
    });

    let code = code
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    code.split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 清洗模型输出中的图表文本，结果幂等：clean(clean(x)) == clean(x)
pub fn clean(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = clean_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn first_non_blank(code: &str) -> Option<&str> {
    code.lines().map(str::trim).find(|line| !line.is_empty())
}

fn has_diagram_keyword(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    MERMAID_KEYWORDS
        .iter()
        .any(|keyword| lower.starts_with(keyword))
}

fn brackets_balanced(code: &str) -> bool {
    BRACKET_PAIRS
        .iter()
        .all(|(open, close, _)| code.matches(*open).count() == code.matches(*close).count())
}

fn is_dangling(line: &str) -> bool {
    DANGLING_ARROW.is_match(line.trim_end())
}

/// 列出所有问题，顺序为：空、类型、括号、悬空箭头
pub fn diagnose(code: &str) -> Vec<SyntaxIssue> {
    let Some(first_line) = first_non_blank(code) else {
        return vec![SyntaxIssue::Empty];
    };

    let mut issues = Vec::new();
    if !has_diagram_keyword(first_line) {
        issues.push(SyntaxIssue::UnknownDiagramType {
            first_line: first_line.to_string(),
        });
    }

    for (open, close, name) in BRACKET_PAIRS {
        let open_count = code.matches(*open).count();
        let close_count = code.matches(*close).count();
        if open_count != close_count {
            issues.push(SyntaxIssue::Unbalanced {
                name: *name,
                open: open_count,
                close: close_count,
            });
        }
    }

    issues.extend(
        code.lines()
            .filter(|line| is_dangling(line))
            .map(|line| SyntaxIssue::DanglingArrow {
                line: line.trim().to_string(),
            }),
    );
    issues
}

/// 启发式校验，不是完整语法解析；返回首个问题
pub fn validate(code: &str) -> Result<(), SyntaxIssue> {
    match diagnose(code).into_iter().next() {
        Some(issue) => Err(issue),
        None => Ok(()),
    }
}

fn repair_once(code: &str) -> String {
    let mut lines: Vec<&str> = code.trim().split('\n').collect();

    if !lines.first().is_some_and(|line| has_diagram_keyword(line)) {
        info!("Mermaid repair: prepended '{}'", DEFAULT_DIAGRAM_HEADER);
        lines.insert(0, DEFAULT_DIAGRAM_HEADER);
    }

    while lines.len() > 1 && !brackets_balanced(&lines.join("\n")) {
        lines.pop();
    }

    lines
        .into_iter()
        .filter(|line| {
            let dangling = is_dangling(line);
            if dangling {
                info!("Mermaid repair: removed incomplete arrow line: '{}'", line.trim_end());
            }
            !dangling
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 尽力修复常见错误，对已修复的文本再次修复不会产生变化
pub fn repair(code: &str) -> String {
    if code.trim().is_empty() {
        return code.to_string();
    }

    let mut current = code.to_string();
    loop {
        let next = repair_once(&current);
        if next == current || next.is_empty() {
            return next;
        }
        current = next;
    }
}
