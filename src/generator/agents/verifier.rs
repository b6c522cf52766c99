use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::generator::agents::{
    AgentInput, AgentType, PipelineAgent, call_model, recover_record, to_output,
};
use crate::generator::context::GeneratorContext;
use crate::generator::recovery::STANDARD_RECOVERY;
use crate::types::documentation::VerificationReport;

/// 质量审核者
#[derive(Default)]
pub struct VerifierAgent;

impl VerifierAgent {
    pub async fn verify(
        &self,
        context: &GeneratorContext,
        source: &str,
        documentation: &Value,
    ) -> VerificationReport {
        let prompt_sys = include_str!("prompts/verifier_sys.tpl").to_string();
        let prompt_user = format!(
            include_str!("prompts/verifier_user.tpl"),
            source,
            serde_json::to_string(documentation).unwrap_or_default()
        );

        let response = call_model(context, AgentType::Verifier, prompt_sys, prompt_user).await;
        recover_record(AgentType::Verifier, &STANDARD_RECOVERY, &response).unwrap_or_default()
    }
}

#[async_trait]
impl PipelineAgent for VerifierAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Verifier
    }

    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
        let documentation = input
            .previous_output(AgentType::Writer)
            .cloned()
            .unwrap_or_else(|| json!({}));

        let report = self.verify(context, input.source, &documentation).await;
        to_output(&report)
    }
}
