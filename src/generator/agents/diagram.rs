use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::generator::agents::{
    AgentInput, AgentType, PipelineAgent, call_model, recover_record, to_output,
};
use crate::generator::context::GeneratorContext;
use crate::generator::mermaid;
use crate::generator::recovery::DIAGRAM_RECOVERY;
use crate::llm::client::utils::preview;
use crate::types::documentation::DiagramDocument;

/// 图表生成者 - 产出经过清洗、校验（必要时修复）的Mermaid图
#[derive(Default)]
pub struct DiagramAgent;

impl DiagramAgent {
    pub async fn generate_diagram(
        &self,
        context: &GeneratorContext,
        source: &str,
        diagram_type: Option<&str>,
    ) -> DiagramDocument {
        let prompt_sys = include_str!("prompts/diagram_sys.tpl").to_string();
        let preferred = diagram_type
            .map(|kind| format!("\nPreferred type: {}", kind))
            .unwrap_or_default();
        let prompt_user = format!(include_str!("prompts/diagram_user.tpl"), source, preferred);

        let response = call_model(context, AgentType::Diagram, prompt_sys, prompt_user).await;
        Self::finalize(&response)
    }

    /// 恢复 → 清洗 → 校验 → 一次修复，仍不合法则使用固定的兜底图
    pub fn finalize(response: &str) -> DiagramDocument {
        let recovered =
            recover_record::<DiagramDocument>(AgentType::Diagram, &DIAGRAM_RECOVERY, response)
                .filter(|document| !document.mermaid_code.trim().is_empty());

        if let Some(mut document) = recovered {
            document.mermaid_code = mermaid::clean(&document.mermaid_code);

            match mermaid::validate(&document.mermaid_code) {
                Ok(()) => {
                    info!(
                        "DiagramAgent: produced valid {} ({} chars)",
                        document.diagram_type,
                        document.mermaid_code.len()
                    );
                    return document;
                }
                Err(issue) => {
                    warn!("Mermaid validation failed: {}, attempting repair", issue);
                    let repaired = mermaid::repair(&document.mermaid_code);
                    match mermaid::validate(&repaired) {
                        Ok(()) => {
                            info!("DiagramAgent: repaired diagram passed validation");
                            document.mermaid_code = repaired;
                            return document;
                        }
                        Err(issue) => warn!("Repair also failed: {}", issue),
                    }
                }
            }
        }

        warn!("Using fallback diagram. Raw response: {}", preview(response, 300));
        DiagramDocument::default()
    }
}

#[async_trait]
impl PipelineAgent for DiagramAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Diagram
    }

    async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
        let document = self
            .generate_diagram(context, input.source, input.diagram_type)
            .await;
        to_output(&document)
    }
}
