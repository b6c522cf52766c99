//! 流水线编排器
//!
//! 单片段模式：Reader → Searcher → Writer → Verifier → Diagram 各执行一次，返回合并记录。
//! 任务模式：按下标逐个处理文件，每次Agent状态变化都写入进度跟踪器；
//! 单个Agent失败或panic只记录在该文件上，流水线继续；全部文件完成后组装项目级章节。
//! 任务记录持久化后从内存注册表移除，之后的查询读取持久化记录。

use futures::{FutureExt, StreamExt, stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::generator::agents::{
    AgentInput, AgentType, PipelineAgent, default_agents, fallback_output,
};
use crate::generator::context::GeneratorContext;
use crate::generator::sections::{ProjectSectionAssembler, SectionAssembler, SectionInput};
use crate::jobs::{
    Job, JobError, JobProgressTracker, JobRegistry, JobStatusSnapshot, JobStore, NullJobStore,
    NullSink, ProgressSink,
};
use crate::types::documentation::{CombinedDocumentation, DocSection, PipelineStages};
use crate::utils::sources::{RepositoryFiles, SourceFile, prompt_language};

/// 多文件任务的提交内容
#[derive(Debug, Clone, Default)]
pub struct RepoJobRequest {
    pub name: String,
    pub files: Vec<SourceFile>,
    pub metadata_files: Vec<SourceFile>,
    pub test_files: Vec<String>,
}

impl RepoJobRequest {
    pub fn new(name: impl Into<String>, files: Vec<SourceFile>) -> Self {
        Self {
            name: name.into(),
            files,
            ..Default::default()
        }
    }

    pub fn from_repository(name: impl Into<String>, repository: RepositoryFiles) -> Self {
        Self {
            name: name.into(),
            files: repository.files,
            metadata_files: repository.metadata_files,
            test_files: repository.test_files,
        }
    }
}

/// 显式构造、依赖注入的编排器，克隆后共享同一个任务注册表
#[derive(Clone)]
pub struct PipelineOrchestrator {
    context: GeneratorContext,
    agents: BTreeMap<AgentType, Arc<dyn PipelineAgent>>,
    registry: JobRegistry,
    sink: Arc<dyn ProgressSink>,
    assembler: Arc<dyn SectionAssembler>,
    store: Arc<dyn JobStore>,
}

fn stage<T: DeserializeOwned + Default>(outputs: &BTreeMap<AgentType, Value>, agent: AgentType) -> T {
    outputs
        .get(&agent)
        .and_then(|output| serde_json::from_value(output.clone()).ok())
        .unwrap_or_default()
}

/// 从panic负载中取出可读的消息
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl PipelineOrchestrator {
    pub fn new(context: GeneratorContext) -> Self {
        Self {
            context,
            agents: default_agents(),
            registry: JobRegistry::new(),
            sink: Arc::new(NullSink),
            assembler: Arc::new(ProjectSectionAssembler),
            store: Arc::new(NullJobStore),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn SectionAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 替换同类型的Agent
    pub fn with_agent(mut self, agent: Arc<dyn PipelineAgent>) -> Self {
        self.agents.insert(agent.agent_type(), agent);
        self
    }

    pub fn context(&self) -> &GeneratorContext {
        &self.context
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// 单片段模式，总能返回结构完整的结果
    pub async fn run_single(&self, source: &str, language: &str) -> CombinedDocumentation {
        self.run_snippet("snippet", source, language, None).await
    }

    /// 单片段模式，可指定路径和首选图表类型
    pub async fn run_snippet(
        &self,
        path: &str,
        source: &str,
        language: &str,
        diagram_type: Option<&str>,
    ) -> CombinedDocumentation {
        let style = self.context.config.pipeline.doc_style;
        let mut outputs: BTreeMap<AgentType, Value> = BTreeMap::new();

        for agent_type in AgentType::ALL {
            let Some(agent) = self.agents.get(&agent_type) else {
                continue;
            };
            info!("{}", agent_type.stage_message());

            let input = AgentInput {
                path,
                source,
                language,
                style,
                diagram_type,
                previous: &outputs,
            };
            let result = AssertUnwindSafe(agent.execute(&self.context, &input))
                .catch_unwind()
                .await;
            let output = match result {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    warn!("Agent '{}' failed, using fallback output: {}", agent_type, err);
                    fallback_output(agent_type, &input)
                }
                Err(payload) => {
                    warn!(
                        "Agent '{}' panicked, using fallback output: {}",
                        agent_type,
                        panic_message(&*payload)
                    );
                    fallback_output(agent_type, &input)
                }
            };
            outputs.insert(agent_type, output);
        }

        CombinedDocumentation::from_stages(PipelineStages {
            analysis: stage(&outputs, AgentType::Reader),
            context: stage(&outputs, AgentType::Searcher),
            documentation: stage(&outputs, AgentType::Writer),
            verification: stage(&outputs, AgentType::Verifier),
            diagram: stage(&outputs, AgentType::Diagram),
        })
    }

    /// 提交多文件任务并在后台执行，立即返回任务id
    pub async fn start_repo_job(&self, request: RepoJobRequest) -> String {
        let (job_id, _handle) = self.spawn_repo_job(request).await;
        job_id
    }

    /// 同start_repo_job，另外返回后台任务句柄；句柄完成时任务记录已持久化
    pub async fn spawn_repo_job(&self, request: RepoJobRequest) -> (String, JoinHandle<Job>) {
        let tracker = self
            .registry
            .create(&request.name, request.files.len(), self.sink.clone())
            .await;
        let job_id = tracker.job_id().to_string();

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.drive_job(tracker, request).await });
        (job_id, handle)
    }

    /// 在当前任务中执行多文件任务直到终态
    pub async fn run_repo_job(&self, request: RepoJobRequest) -> Job {
        let tracker = self
            .registry
            .create(&request.name, request.files.len(), self.sink.clone())
            .await;
        self.drive_job(tracker, request).await
    }

    /// 内存中没有时回落到持久化存储
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, JobError> {
        if let Some(snapshot) = self.registry.snapshot(job_id).await {
            return Ok(snapshot);
        }

        match self.store.load(job_id).await {
            Ok(Some(job)) => Ok(JobStatusSnapshot::from_job(&job)),
            Ok(None) => Err(JobError::NotFound(job_id.to_string())),
            Err(err) => {
                warn!("Failed to load job {} from store: {}", job_id, err);
                Err(JobError::NotFound(job_id.to_string()))
            }
        }
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<(), JobError> {
        self.registry.cancel(job_id).await
    }

    /// 已从内存移除的任务直接读取持久化记录
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Job, JobError> {
        match self.registry.wait(job_id).await {
            Err(JobError::NotFound(_)) => match self.store.load(job_id).await {
                Ok(Some(job)) => Ok(job),
                Ok(None) => Err(JobError::NotFound(job_id.to_string())),
                Err(err) => {
                    warn!("Failed to load job {} from store: {}", job_id, err);
                    Err(JobError::NotFound(job_id.to_string()))
                }
            },
            result => result,
        }
    }

    async fn drive_job(&self, tracker: JobProgressTracker, request: RepoJobRequest) -> Job {
        let RepoJobRequest {
            name,
            files,
            metadata_files,
            test_files,
        } = request;
        tracker.start().await;

        // 单个Agent的panic在process_file内记录；这里只兜住文件循环本身
        let outcome = AssertUnwindSafe(self.process_files(&tracker, files))
            .catch_unwind()
            .await;

        match outcome {
            Err(payload) => {
                tracker
                    .fail(format!(
                        "File processing aborted: {}",
                        panic_message(&*payload)
                    ))
                    .await
            }
            Ok(()) => {
                // 取消导致有文件未完成时不组装章节
                if tracker.synthesizing().await {
                    let sections = self
                        .assemble_sections(&tracker, &name, &metadata_files, &test_files)
                        .await;
                    tracker.complete(sections).await;
                } else {
                    tracker.mark_cancelled().await;
                }
            }
        }

        let job = tracker.job().await;
        match self.store.save(&job).await {
            Ok(()) if self.store.is_persistent() => {
                self.registry.evict(&job.job_id).await;
                debug!("Job {} persisted and evicted from memory", job.job_id);
            }
            Ok(()) => tracker.release_sources().await,
            Err(err) => {
                error!("Failed to persist job {}: {}", job.job_id, err);
                tracker.release_sources().await;
            }
        }
        job
    }

    async fn assemble_sections(
        &self,
        tracker: &JobProgressTracker,
        name: &str,
        metadata_files: &[SourceFile],
        test_files: &[String],
    ) -> Vec<DocSection> {
        let job = tracker.job().await;
        let input = SectionInput {
            project_name: name,
            file_results: &job.file_results,
            metadata_files,
            test_files,
        };

        let result = AssertUnwindSafe(self.assembler.assemble(&self.context, &input))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(sections)) => sections,
            Ok(Err(err)) => {
                error!("Section assembly failed for job {}: {}", job.job_id, err);
                Vec::new()
            }
            Err(payload) => {
                error!(
                    "Section assembly panicked for job {}: {}",
                    job.job_id,
                    panic_message(&*payload)
                );
                Vec::new()
            }
        }
    }

    /// 同一任务内最多max_parallel_files个文件同时处理，结果按下标有序
    async fn process_files(&self, tracker: &JobProgressTracker, files: Vec<SourceFile>) {
        let parallel = self.context.config.pipeline.max_parallel_files.max(1);
        let pending: Vec<_> = files
            .iter()
            .enumerate()
            .map(|(index, file)| self.process_file(tracker, index, file))
            .collect();
        stream::iter(pending)
            .buffered(parallel)
            .collect::<Vec<()>>()
            .await;
    }

    /// 文件内Agent严格串行；每个Agent开始前检查取消
    async fn process_file(&self, tracker: &JobProgressTracker, index: usize, file: &SourceFile) {
        if tracker.is_cancelled() {
            debug!("Job {} cancelled, skipping {}", tracker.job_id(), file.path);
            return;
        }

        tracker.begin_file(index, &file.path, &file.content).await;
        let language = prompt_language(&file.path);
        let style = self.context.config.pipeline.doc_style;
        let mut outputs: BTreeMap<AgentType, Value> = BTreeMap::new();

        for agent_type in AgentType::ALL {
            if tracker.is_cancelled() {
                info!(
                    "Job {} cancelled before agent '{}' on {}",
                    tracker.job_id(),
                    agent_type,
                    file.path
                );
                return;
            }
            let Some(agent) = self.agents.get(&agent_type) else {
                continue;
            };

            tracker.agent_started(index, agent_type).await;
            let input = AgentInput {
                path: &file.path,
                source: &file.content,
                language,
                style,
                diagram_type: None,
                previous: &outputs,
            };
            let result = AssertUnwindSafe(agent.execute(&self.context, &input))
                .catch_unwind()
                .await;

            // 失败或panic的Agent不重试，下游Agent使用各自的默认输入
            match result {
                Ok(Ok(output)) => {
                    tracker
                        .agent_completed(index, agent_type, output.clone())
                        .await;
                    outputs.insert(agent_type, output);
                }
                Ok(Err(err)) => {
                    tracker
                        .agent_failed(index, agent_type, err.to_string())
                        .await
                }
                Err(payload) => {
                    tracker
                        .agent_failed(
                            index,
                            agent_type,
                            format!("Agent panicked: {}", panic_message(&*payload)),
                        )
                        .await
                }
            }
        }

        let documentation = outputs
            .get(&AgentType::Writer)
            .or_else(|| outputs.get(&AgentType::Diagram))
            .cloned();
        tracker.finish_file(index, documentation).await;
    }
}

#[cfg(test)]
mod tests;
