//! 项目级章节组装：任务完成后，把各文件的Agent输出汇总为有序的文档章节

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::generator::agents::AgentType;
use crate::generator::context::GeneratorContext;
use crate::jobs::FileResult;
use crate::llm::client::{ChatMessage, MockBackend, ModelRequest};
use crate::types::documentation::{
    DiagramDocument, DocSection, ReaderAnalysis, VerificationReport, WriterDraft,
};
use crate::utils::project_structure_formatter::ProjectStructureFormatter;
use crate::utils::sources::{SourceFile, display_language};

/// 目录树最大深度
const TREE_DEPTH: usize = 3;
const SUMMARY_MAX_TOKENS: u32 = 1500;

/// 章节组装的输入
#[derive(Debug, Clone, Copy)]
pub struct SectionInput<'a> {
    pub project_name: &'a str,
    pub file_results: &'a [FileResult],
    pub metadata_files: &'a [SourceFile],
    pub test_files: &'a [String],
}

/// 每个完成的任务调用一次
#[async_trait]
pub trait SectionAssembler: Send + Sync {
    async fn assemble(
        &self,
        context: &GeneratorContext,
        input: &SectionInput<'_>,
    ) -> Result<Vec<DocSection>>;
}

/// 默认组装器：项目信息、执行摘要、交付范围、源码交付、图表、质量报告
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectSectionAssembler;

#[derive(Debug, Clone)]
struct DiagramEntry {
    source: String,
    code: String,
    description: String,
}

#[derive(Debug, Clone)]
struct FileDoc {
    path: String,
    docstring: String,
    markdown: String,
}

/// 多个章节共用的统计数据
#[derive(Debug, Default)]
struct ProjectAggregate {
    languages: BTreeMap<String, usize>,
    total_loc: usize,
    total_files: usize,
    total_test_files: usize,
    deps_internal: BTreeSet<String>,
    deps_external: BTreeSet<String>,
    architecture_types: BTreeSet<String>,
    examples: Vec<String>,
    diagrams: Vec<DiagramEntry>,
    file_docs: Vec<FileDoc>,
    quality_scores: Vec<(String, f64)>,
    avg_quality: u32,
    file_paths: Vec<String>,
    readme: String,
    license: String,
}

fn agent_record<T: DeserializeOwned>(file: &FileResult, agent: AgentType) -> Option<T> {
    file.agent_output(agent)
        .and_then(|output| serde_json::from_value(output.clone()).ok())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn join_or(items: impl IntoIterator<Item = String>, fallback: &str) -> String {
    let joined = items.into_iter().collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        fallback.to_string()
    } else {
        joined
    }
}

impl ProjectAggregate {
    fn collect(input: &SectionInput<'_>) -> Self {
        let mut aggregate = ProjectAggregate {
            total_files: input.file_results.len(),
            total_test_files: input.test_files.len(),
            ..Default::default()
        };

        for file in input.file_results {
            let path = file.path.clone();
            aggregate.file_paths.push(path.clone());
            *aggregate
                .languages
                .entry(display_language(&path).to_string())
                .or_default() += 1;

            if let Some(analysis) = agent_record::<ReaderAnalysis>(file, AgentType::Reader) {
                aggregate.deps_internal.extend(analysis.dependencies.internal);
                aggregate.deps_external.extend(analysis.dependencies.external);
                if !analysis.architecture_type.is_empty() {
                    aggregate.architecture_types.insert(analysis.architecture_type);
                }
            }

            if let Some(draft) = agent_record::<WriterDraft>(file, AgentType::Writer) {
                aggregate.examples.extend(draft.examples);
                if !draft.docstring.is_empty() || !draft.markdown.is_empty() {
                    aggregate.file_docs.push(FileDoc {
                        path: path.clone(),
                        docstring: draft.docstring,
                        markdown: draft.markdown,
                    });
                }
            }

            let quality = agent_record::<VerificationReport>(file, AgentType::Verifier)
                .map(|report| report.quality_score)
                .unwrap_or(0.0);
            aggregate.quality_scores.push((path.clone(), quality));

            if let Some(diagram) = agent_record::<DiagramDocument>(file, AgentType::Diagram) {
                if !diagram.mermaid_code.is_empty() {
                    aggregate.diagrams.push(DiagramEntry {
                        source: path.clone(),
                        code: diagram.mermaid_code,
                        description: diagram.description,
                    });
                }
            }

            if !file.content.is_empty() {
                aggregate.total_loc += file.content.matches('\n').count() + 1;
            }
        }

        let scored: Vec<f64> = aggregate
            .quality_scores
            .iter()
            .map(|(_, score)| *score)
            .filter(|score| *score > 0.0)
            .collect();
        if !scored.is_empty() {
            aggregate.avg_quality = (scored.iter().sum::<f64>() / scored.len() as f64).round() as u32;
        }

        for metadata in input.metadata_files {
            let name = metadata.file_name().to_lowercase();
            if name.starts_with("readme") && aggregate.readme.is_empty() {
                aggregate.readme = metadata.content.clone();
            } else if name.starts_with("license") && aggregate.license.is_empty() {
                aggregate.license = metadata.content.clone();
            }
        }

        aggregate
    }

    /// 按文件数降序排列的语言
    fn languages_by_count(&self) -> Vec<(&String, &usize)> {
        let mut languages: Vec<_> = self.languages.iter().collect();
        languages.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        languages
    }

    fn tree(&self) -> String {
        ProjectStructureFormatter::format_path_tree(&self.file_paths, TREE_DEPTH)
    }
}

impl ProjectSectionAssembler {
    fn project_info(&self, name: &str, aggregate: &ProjectAggregate) -> DocSection {
        let languages = join_or(
            aggregate
                .languages_by_count()
                .into_iter()
                .map(|(language, count)| format!("{} ({} files)", language, count)),
            "none",
        );
        let readme = if aggregate.readme.is_empty() {
            "No README found.".to_string()
        } else {
            excerpt(&aggregate.readme, 1500)
        };

        let content = format!(
            "## {}\n\n**Languages:** {}\n**Total Source Files:** {}\n**Total Lines of Code:** {}\n\n---\n\n### README\n\n{}",
            name, languages, aggregate.total_files, aggregate.total_loc, readme
        );
        DocSection::new("Project Information", "project_info", content)
    }

    /// 所有后端都不可用时的确定性摘要
    fn local_summary(&self, name: &str, aggregate: &ProjectAggregate) -> String {
        let languages = join_or(
            aggregate
                .languages_by_count()
                .into_iter()
                .map(|(language, _)| language.clone()),
            "mixed-language",
        );
        format!(
            "**{}** is a {} codebase of {} source files and {} lines of code.\n\nArchitecture types found: {}. External dependencies: {}.\n\nAverage documentation quality score: {}%.",
            name,
            languages,
            aggregate.total_files,
            aggregate.total_loc,
            join_or(aggregate.architecture_types.iter().cloned(), "various"),
            join_or(aggregate.deps_external.iter().take(30).cloned(), "none detected"),
            aggregate.avg_quality
        )
    }

    async fn executive_summary(
        &self,
        context: &GeneratorContext,
        name: &str,
        aggregate: &ProjectAggregate,
    ) -> Result<DocSection> {
        let prompt_sys = include_str!("prompts/executive_summary_sys.tpl").to_string();
        let prompt_user = format!(
            include_str!("prompts/executive_summary_user.tpl"),
            name,
            serde_json::to_string(&aggregate.languages)?,
            aggregate.total_files,
            aggregate.total_loc,
            join_or(aggregate.architecture_types.iter().cloned(), "various"),
            join_or(aggregate.deps_external.iter().take(30).cloned(), "none detected"),
            aggregate.avg_quality,
            excerpt(&aggregate.readme, 500)
        );

        let model = context
            .config
            .inference
            .models
            .for_agent(AgentType::Writer);
        let request = ModelRequest::new(
            model.model_id.clone(),
            vec![ChatMessage::system(prompt_sys), ChatMessage::user(prompt_user)],
            context.config.inference.temperature,
            SUMMARY_MAX_TOKENS,
        );
        let generation = context.inference.generate_request(&request).await;

        let content = if generation.backend == MockBackend::NAME {
            debug!("Executive summary falls back to local summary text");
            self.local_summary(name, aggregate)
        } else {
            generation.text.trim().to_string()
        };
        Ok(DocSection::new("Executive Summary", "executive_summary", content))
    }

    fn scope(&self, name: &str, aggregate: &ProjectAggregate) -> DocSection {
        let language_rows = aggregate
            .languages_by_count()
            .into_iter()
            .map(|(language, count)| format!("| {} | {} |", language, count))
            .collect::<Vec<_>>()
            .join("\n");

        let content = format!(
            "## Scope of Delivery\n\nThis document covers the software deliverables for **{}**.\n\n### Deliverable Summary\n\n| Metric | Value |\n|--------|-------|\n| Source files documented | {} |\n| Test files identified | {} |\n| Total lines of code | {} |\n| Languages | {} |\n| Diagrams generated | {} |\n| Average quality score | {}% |\n\n### Languages Breakdown\n\n| Language | Files |\n|----------|-------|\n{}\n\n### Directory Structure\n\n```\n{}\n```",
            name,
            aggregate.total_files,
            aggregate.total_test_files,
            aggregate.total_loc,
            aggregate.languages.len(),
            aggregate.diagrams.len(),
            aggregate.avg_quality,
            language_rows,
            aggregate.tree()
        );
        DocSection::new("Scope of Delivery", "scope", content)
    }

    fn source_code_delivery(&self, aggregate: &ProjectAggregate) -> DocSection {
        let inventory = aggregate
            .file_paths
            .iter()
            .enumerate()
            .map(|(i, path)| format!("| {} | {} |", i + 1, path))
            .collect::<Vec<_>>()
            .join("\n");

        let mut content = format!(
            "## Source Code Delivery\n\n### Repository Structure\n\n```\n{}\n```\n\n### File Inventory\n\n| # | File Path |\n|---|-----------|\n{}\n\n### File Documentation\n",
            aggregate.tree(),
            inventory
        );
        for doc in &aggregate.file_docs {
            content.push_str(&format!("\n#### {}\n\n", doc.path));
            if doc.markdown.is_empty() {
                content.push_str(&format!("```\n{}\n```\n", doc.docstring));
            } else {
                content.push_str(&doc.markdown);
                content.push('\n');
            }
        }
        if !aggregate.examples.is_empty() {
            content.push_str("\n### Usage Examples\n\n");
            for example in aggregate.examples.iter().take(20) {
                content.push_str(&format!("```\n{}\n```\n", example));
            }
        }

        DocSection::new("Source Code Delivery", "source_code", content.trim_end().to_string())
    }

    fn diagrams(&self, aggregate: &ProjectAggregate) -> DocSection {
        let content = if aggregate.diagrams.is_empty() {
            "## Diagrams\n\nNo diagrams were generated.".to_string()
        } else {
            let body = aggregate
                .diagrams
                .iter()
                .map(|diagram| {
                    let description = if diagram.description.is_empty() {
                        String::new()
                    } else {
                        format!("*{}*\n\n", diagram.description)
                    };
                    format!(
                        "### {}\n\n{}```mermaid\n{}\n```",
                        diagram.source, description, diagram.code
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            format!("## Diagrams\n\n{}", body)
        };

        DocSection::new("Diagrams", "diagrams", content).with_diagrams(
            aggregate
                .diagrams
                .iter()
                .map(|diagram| diagram.code.clone())
                .collect(),
        )
    }

    fn quality_report(&self, aggregate: &ProjectAggregate) -> DocSection {
        let glossary = if aggregate.deps_external.is_empty() {
            "| (none) | - |".to_string()
        } else {
            aggregate
                .deps_external
                .iter()
                .take(30)
                .map(|dep| format!("| {} | External dependency |", dep))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let scores = aggregate
            .quality_scores
            .iter()
            .map(|(path, score)| format!("| {} | {:.0}% |", path, score))
            .collect::<Vec<_>>()
            .join("\n");
        let license = if aggregate.license.is_empty() {
            "No LICENSE file found in the repository.".to_string()
        } else {
            excerpt(&aggregate.license, 1000)
        };

        let content = format!(
            "## Quality Report\n\n**Average quality score:** {}%\n\n### A. Dependencies\n\n**External Dependencies:** {}\n**Internal Dependencies:** {}\n\n### B. Glossary\n\n| Term | Description |\n|------|-------------|\n{}\n\n### C. Quality Metrics by File\n\n| File | Quality Score |\n|------|--------------|\n{}\n\n### D. License\n\n{}",
            aggregate.avg_quality,
            aggregate.deps_external.len(),
            aggregate.deps_internal.len(),
            glossary,
            scores,
            license
        );
        DocSection::new("Quality Report", "quality_report", content)
    }
}

#[async_trait]
impl SectionAssembler for ProjectSectionAssembler {
    async fn assemble(
        &self,
        context: &GeneratorContext,
        input: &SectionInput<'_>,
    ) -> Result<Vec<DocSection>> {
        info!(
            "Assembling documentation sections for {} ({} files)",
            input.project_name,
            input.file_results.len()
        );
        let aggregate = ProjectAggregate::collect(input);

        let sections = vec![
            self.project_info(input.project_name, &aggregate),
            self.executive_summary(context, input.project_name, &aggregate)
                .await?,
            self.scope(input.project_name, &aggregate),
            self.source_code_delivery(&aggregate),
            self.diagrams(&aggregate),
            self.quality_report(&aggregate),
        ];

        info!("Section assembly complete: {} sections", sections.len());
        Ok(sections)
    }
}
