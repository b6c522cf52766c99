use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::generator::agents::{
    AgentInput, AgentType, PipelineAgent, call_model, recover_record, to_output,
};
use crate::generator::context::GeneratorContext;
use crate::generator::recovery::STANDARD_RECOVERY;
use crate::types::documentation::SearchContext;

/// 上下文检索者 - 基于Reader的分析补充模式、最佳实践和概念
#[derive(Default)]
pub struct SearcherAgent;

impl SearcherAgent {
    pub async fn search(
        &self,
        context: &GeneratorContext,
        analysis: &Value,
        language: &str,
    ) -> SearchContext {
        let prompt_sys = include_str!("prompts/searcher_sys.tpl").to_string();
        let prompt_user = format!(
            include_str!("prompts/searcher_user.tpl"),
            language,
            serde_json::to_string(analysis).unwrap_or_default()
        );

        let response = call_model(context, AgentType::Searcher, prompt_sys, prompt_user).await;
        recover_record(AgentType::Searcher, &STANDARD_RECOVERY, &response).unwrap_or_default()
    }
}

#[async_trait]
impl PipelineAgent for SearcherAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Searcher
    }

    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
        let analysis = input
            .previous_output(AgentType::Reader)
            .cloned()
            .unwrap_or_else(|| json!({"documentation_needs": ["docstring"]}));

        let search_context = self.search(context, &analysis, input.language).await;
        to_output(&search_context)
    }
}
