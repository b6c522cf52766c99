use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::DocStyle;
use crate::generator::agents::{AgentInput, AgentType, PipelineAgent, call_model, to_output};
use crate::generator::context::GeneratorContext;
use crate::generator::recovery::{WRITER_RECOVERY, salvage_writer_fields};
use crate::llm::client::utils::preview;
use crate::types::documentation::{AgentRecord, WriterDraft};

/// 文档撰写者
#[derive(Default)]
pub struct WriterAgent;

impl WriterAgent {
    pub async fn write(
        &self,
        context: &GeneratorContext,
        source: &str,
        search_context: &Value,
        language: &str,
        style: DocStyle,
    ) -> WriterDraft {
        let prompt_sys = format!(include_str!("prompts/writer_sys.tpl"), style.style_guide());
        let prompt_user = format!(
            include_str!("prompts/writer_user.tpl"),
            language,
            language,
            source,
            serde_json::to_string(search_context).unwrap_or_default()
        );

        let response = call_model(context, AgentType::Writer, prompt_sys, prompt_user).await;
        Self::parse_response(&response, source, language)
    }

    /// 解析Writer输出：策略链 → 字段级提取 → 基于源码的兜底文档
    pub fn parse_response(response: &str, source: &str, language: &str) -> WriterDraft {
        if let Some(draft) = WRITER_RECOVERY
            .extract(response)
            .and_then(WriterDraft::from_value)
        {
            return draft;
        }

        if let Some(draft) = salvage_writer_fields(response).and_then(WriterDraft::from_value) {
            info!("Writer: salvaged docstring/markdown fields from malformed JSON");
            return draft;
        }

        warn!(
            "Failed to parse writer response as JSON: {}",
            preview(response, 300)
        );
        WriterDraft::fallback(source, language)
    }
}

#[async_trait]
impl PipelineAgent for WriterAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Writer
    }

    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
        let search_context = input
            .previous_output(AgentType::Searcher)
            .cloned()
            .unwrap_or_else(|| json!({}));

        let draft = self
            .write(context, input.source, &search_context, input.language, input.style)
            .await;
        to_output(&draft)
    }
}
