use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::generator::agents::{
    AgentInput, AgentType, PipelineAgent, call_model, recover_record, to_output,
};
use crate::generator::context::GeneratorContext;
use crate::generator::recovery::STANDARD_RECOVERY;
use crate::types::documentation::ReaderAnalysis;

/// 代码阅读者 - 分析复杂度、依赖和文档需求
#[derive(Default)]
pub struct ReaderAgent;

impl ReaderAgent {
    pub async fn analyze(
        &self,
        context: &GeneratorContext,
        source: &str,
        language: &str,
    ) -> ReaderAnalysis {
        let prompt_sys = include_str!("prompts/reader_sys.tpl").to_string();
        let prompt_user = format!(
            include_str!("prompts/reader_user.tpl"),
            language, language, source
        );

        let response = call_model(context, AgentType::Reader, prompt_sys, prompt_user).await;
        recover_record(AgentType::Reader, &STANDARD_RECOVERY, &response).unwrap_or_default()
    }
}

#[async_trait]
impl PipelineAgent for ReaderAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Reader
    }

    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
        let analysis = self.analyze(context, input.source, input.language).await;
        to_output(&analysis)
    }
}
