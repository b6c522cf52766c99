//! 五个流水线Agent：Reader → Searcher → Writer → Verifier → Diagram
//!
//! 每个Agent由固定的提示词契约、一次推理调用、输出恢复和兜底记录组成，
//! 模型输出无法解析时退化为兜底记录，流水线总能继续推进。

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::warn;

use crate::config::DocStyle;
use crate::generator::context::GeneratorContext;
use crate::generator::recovery::OutputRecovery;
use crate::llm::client::ChatMessage;
use crate::llm::client::utils::preview;
use crate::types::documentation::{
    AgentRecord, DiagramDocument, ReaderAnalysis, SearchContext, VerificationReport, WriterDraft,
};

pub mod diagram;
pub mod reader;
pub mod searcher;
pub mod verifier;
pub mod writer;

pub use diagram::DiagramAgent;
pub use reader::ReaderAgent;
pub use searcher::SearcherAgent;
pub use verifier::VerifierAgent;
pub use writer::WriterAgent;

/// Agent类型，顺序即流水线顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Reader,
    Searcher,
    Writer,
    Verifier,
    Diagram,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Reader,
        AgentType::Searcher,
        AgentType::Writer,
        AgentType::Verifier,
        AgentType::Diagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Reader => "reader",
            AgentType::Searcher => "searcher",
            AgentType::Writer => "writer",
            AgentType::Verifier => "verifier",
            AgentType::Diagram => "diagram",
        }
    }

    /// 流水线中的位置（从0开始）
    pub fn position(&self) -> usize {
        Self::ALL
            .iter()
            .position(|agent| agent == self)
            .unwrap_or_default()
    }

    /// 单片段模式下各阶段的进度提示
    pub fn stage_message(&self) -> &'static str {
        match self {
            AgentType::Reader => "Analyzing code structure...",
            AgentType::Searcher => "Gathering context...",
            AgentType::Writer => "Writing documentation...",
            AgentType::Verifier => "Verifying quality...",
            AgentType::Diagram => "Generating diagrams...",
        }
    }
}

impl Display for AgentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 一次Agent调用的输入
#[derive(Debug, Clone, Copy)]
pub struct AgentInput<'a> {
    pub path: &'a str,
    pub source: &'a str,
    pub language: &'a str,
    pub style: DocStyle,
    /// Diagram Agent的首选图表类型
    pub diagram_type: Option<&'a str>,
    /// 同一文件中前序Agent的输出
    pub previous: &'a BTreeMap<AgentType, Value>,
}

impl<'a> AgentInput<'a> {
    pub fn previous_output(&self, agent: AgentType) -> Option<&'a Value> {
        self.previous.get(&agent)
    }
}

/// 流水线Agent
#[async_trait]
pub trait PipelineAgent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// 执行Agent；只有非推理、非解析类的意外才返回错误
    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value>;
}

/// 默认的五个Agent
pub fn default_agents() -> BTreeMap<AgentType, Arc<dyn PipelineAgent>> {
    let agents: [Arc<dyn PipelineAgent>; 5] = [
        Arc::new(ReaderAgent),
        Arc::new(SearcherAgent),
        Arc::new(WriterAgent),
        Arc::new(VerifierAgent),
        Arc::new(DiagramAgent),
    ];
    agents
        .into_iter()
        .map(|agent| (agent.agent_type(), agent))
        .collect()
}

/// Agent出错时替代其输出的兜底记录
pub fn fallback_output(agent: AgentType, input: &AgentInput<'_>) -> Value {
    let value = match agent {
        AgentType::Reader => serde_json::to_value(ReaderAnalysis::default()),
        AgentType::Searcher => serde_json::to_value(SearchContext::default()),
        AgentType::Writer => serde_json::to_value(WriterDraft::fallback(input.source, input.language)),
        AgentType::Verifier => serde_json::to_value(VerificationReport::default()),
        AgentType::Diagram => serde_json::to_value(DiagramDocument::default()),
    };
    value.unwrap_or(Value::Null)
}

/// 使用该Agent配置的模型发起一次推理
pub(crate) async fn call_model(
    context: &GeneratorContext,
    agent: AgentType,
    system_prompt: String,
    user_prompt: String,
) -> String {
    let model = context.config.inference.models.for_agent(agent);
    context
        .inference
        .generate(
            &model.model_id,
            vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
            context.config.inference.temperature,
            model.max_tokens,
        )
        .await
}

/// 恢复并校验记录，失败时返回None并记录日志
pub(crate) fn recover_record<T: AgentRecord>(
    agent: AgentType,
    recovery: &OutputRecovery,
    response: &str,
) -> Option<T> {
    let record = recovery.extract(response).and_then(T::from_value);
    if record.is_none() {
        warn!(
            "Failed to parse {} response as JSON: {}",
            agent,
            preview(response, 200)
        );
    }
    record
}

pub(crate) fn to_output<T: Serialize>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}
