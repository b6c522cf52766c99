use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型输出宽松反序列化：数字可能以字符串出现，列表可能退化为单个字符串
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_to_string(value: Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(text) => text,
            other => other.to_string(),
        }
    }

    pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(number) => number.as_f64().unwrap_or_default(),
            Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().unwrap_or_default(),
            Value::Bool(flag) => f64::from(u8::from(flag)),
            _ => 0.0,
        })
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(flag) => flag,
            Value::String(text) => matches!(text.trim().to_lowercase().as_str(), "true" | "yes"),
            Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
            _ => false,
        })
    }

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(value_to_string(Value::deserialize(deserializer)?))
    }

    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items
                .into_iter()
                .map(value_to_string)
                .filter(|item| !item.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            Value::String(text) if text.trim().is_empty() => Vec::new(),
            other => vec![value_to_string(other)],
        })
    }
}

/// 可由模型输出恢复的结构化记录
pub trait AgentRecord: Serialize + DeserializeOwned + Default {
    /// 恢复出的对象至少要包含其中一个键才被接受
    const EXPECTED_KEYS: &'static [&'static str];

    /// 校验并转换恢复出的JSON值
    fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        if !Self::EXPECTED_KEYS.iter().any(|key| object.contains_key(*key)) {
            return None;
        }
        serde_json::from_value::<Self>(value)
            .ok()
            .map(Self::normalize)
    }

    fn normalize(self) -> Self {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityMetrics {
    #[serde(deserialize_with = "lenient::number")]
    pub cyclomatic: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub cognitive: f64,
}

impl Default for ComplexityMetrics {
    fn default() -> Self {
        Self {
            cyclomatic: 5.0,
            cognitive: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySet {
    #[serde(deserialize_with = "lenient::string_list")]
    pub internal: Vec<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub external: Vec<String>,
}

/// Reader分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderAnalysis {
    pub complexity: ComplexityMetrics,
    pub dependencies: DependencySet,
    #[serde(deserialize_with = "lenient::text")]
    pub architecture_type: String,
    #[serde(deserialize_with = "lenient::string_list")]
    pub documentation_needs: Vec<String>,
}

impl ReaderAnalysis {
    pub fn default_documentation_needs() -> Vec<String> {
        ["docstring", "parameters", "return_value", "examples"]
            .iter()
            .map(|need| need.to_string())
            .collect()
    }
}

impl Default for ReaderAnalysis {
    fn default() -> Self {
        Self {
            complexity: ComplexityMetrics::default(),
            dependencies: DependencySet::default(),
            architecture_type: "function".to_string(),
            documentation_needs: Self::default_documentation_needs(),
        }
    }
}

impl AgentRecord for ReaderAnalysis {
    const EXPECTED_KEYS: &'static [&'static str] = &[
        "complexity",
        "dependencies",
        "architecture_type",
        "documentation_needs",
    ];

    fn normalize(mut self) -> Self {
        if self.documentation_needs.is_empty() {
            self.documentation_needs = Self::default_documentation_needs();
        }
        self
    }
}

/// Searcher检索到的上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchContext {
    #[serde(deserialize_with = "lenient::string_list")]
    pub patterns: Vec<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub best_practices: Vec<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub concepts: Vec<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub examples: Vec<String>,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self {
            patterns: vec!["standard function documentation".to_string()],
            best_practices: vec!["Include type hints".to_string(), "Add examples".to_string()],
            concepts: Vec::new(),
            examples: Vec::new(),
        }
    }
}

impl AgentRecord for SearchContext {
    const EXPECTED_KEYS: &'static [&'static str] =
        &["patterns", "best_practices", "concepts", "examples"];
}

/// Writer生成的文档草稿
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterDraft {
    #[serde(deserialize_with = "lenient::text")]
    pub docstring: String,
    #[serde(deserialize_with = "lenient::text")]
    pub markdown: String,
    #[serde(deserialize_with = "lenient::string_list")]
    pub examples: Vec<String>,
}

impl WriterDraft {
    /// 从源码中推断符号名：`def ` 或 `function ` 之后、`(` 之前的文本
    pub fn symbol_name(source: &str) -> String {
        ["def ", "function "]
            .iter()
            .find_map(|marker| {
                source.split_once(marker).map(|(_, rest)| {
                    rest.split('(').next().unwrap_or_default().trim().to_string()
                })
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "function".to_string())
    }

    /// 无法解析模型输出时的兜底文档
    pub fn fallback(source: &str, language: &str) -> Self {
        let name = Self::symbol_name(source);
        Self {
            docstring: format!(
                "\"\"\"\n{name}: Auto-generated documentation.\n\nThis function performs operations as defined in the source code.\n\nArgs:\n    See source code for parameters.\n\nReturns:\n    See source code for return value.\n\"\"\""
            ),
            markdown: format!(
                "# {name}\n\n## Overview\n\nThis function is part of the codebase.\n\n## Usage\n\n```{language}\nresult = {name}()\n```"
            ),
            examples: vec![format!("result = {name}()")],
        }
    }
}

impl AgentRecord for WriterDraft {
    const EXPECTED_KEYS: &'static [&'static str] = &["docstring", "markdown"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityEvaluation {
    #[serde(deserialize_with = "lenient::number")]
    pub accuracy: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub completeness: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub clarity: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub examples: f64,
}

impl Default for QualityEvaluation {
    fn default() -> Self {
        Self {
            accuracy: 85.0,
            completeness: 80.0,
            clarity: 90.0,
            examples: 85.0,
        }
    }
}

/// Verifier质量评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationReport {
    #[serde(deserialize_with = "lenient::flag")]
    pub approved: bool,
    #[serde(deserialize_with = "lenient::number")]
    pub quality_score: f64,
    pub evaluation: QualityEvaluation,
    #[serde(deserialize_with = "lenient::string_list")]
    pub feedback: Vec<String>,
}

impl Default for VerificationReport {
    fn default() -> Self {
        Self {
            approved: true,
            quality_score: 85.0,
            evaluation: QualityEvaluation::default(),
            feedback: vec!["Documentation generated successfully".to_string()],
        }
    }
}

impl AgentRecord for VerificationReport {
    const EXPECTED_KEYS: &'static [&'static str] =
        &["approved", "quality_score", "evaluation", "feedback"];
}

/// Diagram产出的图表，有效性只取决于mermaid_code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagramDocument {
    #[serde(deserialize_with = "lenient::text")]
    pub diagram_type: String,
    #[serde(alias = "code", deserialize_with = "lenient::text")]
    pub mermaid_code: String,
    #[serde(deserialize_with = "lenient::text")]
    pub description: String,
}

impl Default for DiagramDocument {
    fn default() -> Self {
        Self {
            diagram_type: "flowchart".to_string(),
            mermaid_code: "flowchart TD\n    A[Start] --> B{Input Valid?}\n    B -->|Yes| C[Process Data]\n    B -->|No| D[Handle Error]\n    C --> E[Return Result]\n    D --> E\n    E --> F[End]".to_string(),
            description: "Auto-generated flowchart showing basic control flow".to_string(),
        }
    }
}

impl AgentRecord for DiagramDocument {
    const EXPECTED_KEYS: &'static [&'static str] = &["mermaid_code", "code"];
}

/// 单次流水线各阶段输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStages {
    pub analysis: ReaderAnalysis,
    pub context: SearchContext,
    pub documentation: WriterDraft,
    pub verification: VerificationReport,
    pub diagram: DiagramDocument,
}

/// 面向调用方的最终文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentationSummary {
    pub docstring: String,
    pub markdown: String,
    pub examples: Vec<String>,
    pub quality_score: f64,
    pub diagram: DiagramDocument,
}

/// 单片段模式的合并结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDocumentation {
    pub status: String,
    pub stages: PipelineStages,
    pub documentation: DocumentationSummary,
}

impl CombinedDocumentation {
    pub fn from_stages(stages: PipelineStages) -> Self {
        let documentation = DocumentationSummary {
            docstring: stages.documentation.docstring.clone(),
            markdown: stages.documentation.markdown.clone(),
            examples: stages.documentation.examples.clone(),
            quality_score: stages.verification.quality_score,
            diagram: stages.diagram.clone(),
        };
        Self {
            status: "completed".to_string(),
            stages,
            documentation,
        }
    }
}

/// 项目级文档章节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocSection {
    pub title: String,
    #[serde(rename = "type")]
    pub section_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagrams: Vec<String>,
}

impl DocSection {
    pub fn new(title: &str, section_type: &str, content: String) -> Self {
        Self {
            title: title.to_string(),
            section_type: section_type.to_string(),
            content,
            diagrams: Vec::new(),
        }
    }

    pub fn with_diagrams(mut self, diagrams: Vec<String>) -> Self {
        self.diagrams = diagrams;
        self
    }
}
